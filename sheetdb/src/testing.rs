//! Shared fixtures for unit tests: a small product catalog.

use crate::entity::{Entity, Navigate};
use crate::schema::{DataType, EntityModel, FieldModel, ModelRegistry};
use crate::value::Value;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub id: i32,
    pub title: Option<String>,
    pub price: Decimal,
    pub category_id: i64,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: Option<String>,
    pub products: Vec<Product>,
}

pub fn product_model() -> EntityModel {
    EntityModel::new("Product")
        .namespace("Shop.Models")
        .field(FieldModel::scalar("Id", DataType::Int32))
        .field(FieldModel::nullable("Title", DataType::String))
        .field(FieldModel::scalar("Price", DataType::Decimal))
        .field(FieldModel::scalar("CategoryId", DataType::Int64))
        .field(FieldModel::reference("Category", "Category"))
}

pub fn category_model() -> EntityModel {
    EntityModel::new("Category")
        .namespace("Shop.Models")
        .field(FieldModel::scalar("Id", DataType::Int64))
        .field(FieldModel::nullable("Name", DataType::String))
        .field(FieldModel::collection("Products", "Product"))
}

pub fn catalog_registry() -> ModelRegistry {
    vec![product_model(), category_model()].into_iter().collect()
}

impl Entity for Product {
    fn model() -> EntityModel {
        product_model()
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "Id" => self.id.into(),
            "Title" => self.title.clone().into(),
            "Price" => self.price.into(),
            "CategoryId" => self.category_id.into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "Id" => self.id = value.as_i32().unwrap_or_default(),
            "Title" => self.title = value.into_text(),
            "Price" => self.price = value.as_decimal().unwrap_or_default(),
            "CategoryId" => self.category_id = value.as_i64().unwrap_or_default(),
            _ => {}
        }
    }

    fn validate(&self) -> Vec<String> {
        if self.price.is_sign_negative() {
            vec!["Price must not be negative".to_string()]
        } else {
            Vec::new()
        }
    }
}

impl Navigate<Category> for Product {
    fn attach(&mut self, navigation: &str, related: Vec<Category>) {
        if navigation == "Category" {
            self.category = related.into_iter().next();
        }
    }
}

impl Entity for Category {
    fn model() -> EntityModel {
        category_model()
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "Id" => self.id.into(),
            "Name" => self.name.clone().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "Id" => self.id = value.as_i64().unwrap_or_default(),
            "Name" => self.name = value.into_text(),
            _ => {}
        }
    }
}

impl Navigate<Product> for Category {
    fn attach(&mut self, navigation: &str, related: Vec<Product>) {
        if navigation == "Products" {
            self.products = related;
        }
    }
}

pub fn product(id: i32, title: &str, price: i64, category_id: i64) -> Product {
    Product {
        id,
        title: Some(title.to_string()),
        price: Decimal::from(price),
        category_id,
        category: None,
    }
}
