//! Client-side equality joins for navigation fields.

use crate::entity::{Entity, Navigate};
use crate::error::{Result, SheetDbError};
use crate::mapping::{is_blank, row_to_entity, HeaderIndex};
use crate::migration::MigrationSnapshot;
use crate::provider::{Row, SheetProvider};
use crate::schema::{ColumnSchema, EntitySchema, FieldKind};
use std::collections::HashMap;

/// Populates navigation fields after a load.
///
/// Each related table is read at most once per resolver; keep a resolver
/// for the lifetime of one logical query.
pub struct RelationshipResolver<'a> {
    provider: &'a dyn SheetProvider,
    snapshot: &'a MigrationSnapshot,
    cache: HashMap<String, Vec<Row>>,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(provider: &'a dyn SheetProvider, snapshot: &'a MigrationSnapshot) -> Self {
        RelationshipResolver {
            provider,
            snapshot,
            cache: HashMap::new(),
        }
    }

    /// Fill `navigation` on every item.
    ///
    /// A reference navigation gets the first related row whose primary key
    /// equals the item's foreign key; a collection navigation gets every
    /// related row whose foreign key equals the item's primary key. Items
    /// without a match are left untouched.
    pub async fn include<S, T>(&mut self, items: &mut [S], navigation: &str) -> Result<()>
    where
        S: Entity + Navigate<T>,
        T: Entity,
    {
        if items.is_empty() {
            return Ok(());
        }

        let source_model = S::model();
        let field = source_model.get_field(navigation).ok_or_else(|| {
            SheetDbError::Schema(format!(
                "'{}' has no navigation '{}'",
                source_model.type_name, navigation
            ))
        })?;
        let target_type = T::type_name();
        if field.kind.target() != Some(target_type.as_str()) {
            return Err(SheetDbError::Schema(format!(
                "'{}.{}' does not navigate to '{}'",
                source_model.type_name, navigation, target_type
            )));
        }

        let source = self.schema_for(&source_model.type_name)?;
        let target = self.schema_for(&target_type)?;
        let related: Vec<T> = self.load(&target).await?;

        match field.kind {
            FieldKind::Reference(_) => {
                let fk = reference_key(&source, &target, navigation)?;
                let pk = require_key(&target)?;
                for item in items.iter_mut() {
                    let wanted = item.get(&fk.property_name).to_cell();
                    if wanted.is_empty() {
                        continue;
                    }
                    if let Some(found) = related
                        .iter()
                        .find(|r| r.get(&pk.property_name).to_cell() == wanted)
                    {
                        item.attach(navigation, vec![found.clone()]);
                    }
                }
            }
            FieldKind::Collection(_) => {
                let fk = collection_key(&source, &target)?;
                let pk = require_key(&source)?;
                for item in items.iter_mut() {
                    let wanted = item.get(&pk.property_name).to_cell();
                    if wanted.is_empty() {
                        continue;
                    }
                    let matches: Vec<T> = related
                        .iter()
                        .filter(|r| r.get(&fk.property_name).to_cell() == wanted)
                        .cloned()
                        .collect();
                    if !matches.is_empty() {
                        item.attach(navigation, matches);
                    }
                }
            }
            FieldKind::Scalar { .. } => {
                return Err(SheetDbError::Schema(format!(
                    "'{}.{}' is not a navigation",
                    source_model.type_name, navigation
                )))
            }
        }
        Ok(())
    }

    fn schema_for(&self, type_name: &str) -> Result<EntitySchema> {
        self.snapshot
            .entity_for_class(type_name)
            .cloned()
            .ok_or_else(|| SheetDbError::NotRegistered(type_name.to_string()))
    }

    async fn load<T: Entity>(&mut self, schema: &EntitySchema) -> Result<Vec<T>> {
        if !self.cache.contains_key(&schema.table_name) {
            log::debug!("Loading '{}' for navigation", schema.table_name);
            let rows = self.provider.get_all_rows(&schema.table_name).await?;
            self.cache.insert(schema.table_name.clone(), rows);
        }
        let rows = self
            .cache
            .get(&schema.table_name)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let Some((header, data)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        let index = HeaderIndex::from_header(header);
        Ok(data
            .iter()
            .filter(|row| !is_blank(row))
            .map(|row| row_to_entity(row, schema, &index))
            .collect())
    }
}

fn require_key(schema: &EntitySchema) -> Result<&ColumnSchema> {
    schema.primary_key().ok_or_else(|| {
        SheetDbError::Schema(format!(
            "Table '{}' has no primary key to join on",
            schema.table_name
        ))
    })
}

/// Foreign key on the source for a reference navigation: the `<nav>Id`
/// column when there is one, else any foreign key to the target table.
fn reference_key<'s>(source: &'s EntitySchema, target: &EntitySchema, navigation: &str) -> Result<&'s ColumnSchema> {
    let conventional = format!("{navigation}Id");
    let candidates: Vec<&ColumnSchema> = source
        .columns
        .iter()
        .filter(|c| c.is_foreign_key && c.related_table.as_deref() == Some(target.table_name.as_str()))
        .collect();
    candidates
        .iter()
        .find(|c| c.property_name.eq_ignore_ascii_case(&conventional))
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| {
            SheetDbError::Schema(format!(
                "'{}' has no foreign key to '{}'",
                source.table_name, target.table_name
            ))
        })
}

/// Foreign key on the target pointing back at the source table.
fn collection_key<'t>(source: &EntitySchema, target: &'t EntitySchema) -> Result<&'t ColumnSchema> {
    target
        .columns
        .iter()
        .find(|c| c.is_foreign_key && c.related_table.as_deref() == Some(source.table_name.as_str()))
        .ok_or_else(|| {
            SheetDbError::Schema(format!(
                "'{}' has no foreign key to '{}'",
                target.table_name, source.table_name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryWorkbook, ProviderCall};
    use crate::schema::{ModelBuilder, SchemaBuilder};
    use crate::schema::{DataType, EntityModel, FieldModel, ModelRegistry};
    use crate::testing::{catalog_registry, product, Category, Product};
    use crate::value::Value;

    fn snapshot() -> MigrationSnapshot {
        let registry = catalog_registry();
        let schemas = SchemaBuilder::new(&registry, &ModelBuilder::new())
            .build_all()
            .unwrap();
        MigrationSnapshot::from_schemas(schemas).unwrap()
    }

    fn workbook() -> MemoryWorkbook {
        MemoryWorkbook::new()
            .with_sheet(
                "Category",
                vec![vec!["Id", "Name"], vec!["1", "Lighting"], vec!["2", "Furniture"]],
            )
            .with_sheet(
                "Product",
                vec![
                    vec!["Id", "Title", "Price", "CategoryId"],
                    vec!["1", "Lamp", "10", "1"],
                    vec!["2", "Desk", "120", "2"],
                    vec!["3", "Chair", "45", "2"],
                ],
            )
    }

    #[tokio::test]
    async fn test_reference_navigation() {
        let snapshot = snapshot();
        let workbook = workbook();
        let mut resolver = RelationshipResolver::new(&workbook, &snapshot);

        let mut products = vec![
            product(1, "Lamp", 10, 1),
            product(2, "Desk", 120, 2),
            product(9, "Orphan", 1, 7),
        ];
        resolver
            .include::<Product, Category>(&mut products, "Category")
            .await
            .unwrap();

        assert_eq!(
            products[0].category.as_ref().and_then(|c| c.name.as_deref()),
            Some("Lighting")
        );
        assert_eq!(products[1].category.as_ref().map(|c| c.id), Some(2));
        assert!(products[2].category.is_none());
    }

    #[tokio::test]
    async fn test_collection_navigation() {
        let snapshot = snapshot();
        let workbook = workbook();
        let mut resolver = RelationshipResolver::new(&workbook, &snapshot);

        let mut categories = vec![
            Category {
                id: 2,
                ..Default::default()
            },
            Category {
                id: 3,
                ..Default::default()
            },
        ];
        resolver
            .include::<Category, Product>(&mut categories, "Products")
            .await
            .unwrap();

        let titles: Vec<_> = categories[0]
            .products
            .iter()
            .map(|p| p.title.clone().unwrap())
            .collect();
        assert_eq!(titles, vec!["Desk", "Chair"]);
        assert!(categories[1].products.is_empty());
    }

    #[tokio::test]
    async fn test_related_table_loaded_once() {
        let snapshot = snapshot();
        let workbook = workbook();
        let mut resolver = RelationshipResolver::new(&workbook, &snapshot);

        let mut first = vec![product(1, "Lamp", 10, 1)];
        let mut second = vec![product(2, "Desk", 120, 2)];
        resolver
            .include::<Product, Category>(&mut first, "Category")
            .await
            .unwrap();
        resolver
            .include::<Product, Category>(&mut second, "Category")
            .await
            .unwrap();

        let reads = workbook
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::GetAllRows { sheet } if sheet == "Category"))
            .count();
        assert_eq!(reads, 1);
        assert!(second[0].category.is_some());
    }

    #[derive(Debug, Clone, Default)]
    struct Shelf {
        code: Option<String>,
        books: Vec<Book>,
    }

    #[derive(Debug, Clone, Default)]
    struct Book {
        id: i32,
        shelf_id: Option<String>,
    }

    impl Entity for Shelf {
        fn model() -> EntityModel {
            EntityModel::new("Shelf")
                .field(FieldModel::nullable("Code", DataType::String).key())
                .field(FieldModel::collection("Books", "Book"))
        }

        fn get(&self, field: &str) -> Value {
            match field {
                "Code" => self.code.clone().into(),
                _ => Value::Null,
            }
        }

        fn set(&mut self, field: &str, value: Value) {
            if field == "Code" {
                self.code = value.into_text();
            }
        }
    }

    impl Entity for Book {
        fn model() -> EntityModel {
            EntityModel::new("Book")
                .field(FieldModel::scalar("Id", DataType::Int32))
                .field(FieldModel::nullable("ShelfId", DataType::String))
                .field(FieldModel::reference("Shelf", "Shelf"))
        }

        fn get(&self, field: &str) -> Value {
            match field {
                "Id" => self.id.into(),
                "ShelfId" => self.shelf_id.clone().into(),
                _ => Value::Null,
            }
        }

        fn set(&mut self, field: &str, value: Value) {
            match field {
                "Id" => self.id = value.as_i32().unwrap_or_default(),
                "ShelfId" => self.shelf_id = value.into_text(),
                _ => {}
            }
        }
    }

    impl Navigate<Book> for Shelf {
        fn attach(&mut self, navigation: &str, related: Vec<Book>) {
            if navigation == "Books" {
                self.books = related;
            }
        }
    }

    #[tokio::test]
    async fn test_blank_key_collects_nothing() {
        let registry: ModelRegistry = vec![Shelf::model(), Book::model()].into_iter().collect();
        let schemas = SchemaBuilder::new(&registry, &ModelBuilder::new())
            .build_all()
            .unwrap();
        let snapshot = MigrationSnapshot::from_schemas(schemas).unwrap();
        let workbook = MemoryWorkbook::new().with_sheet(
            "Book",
            vec![vec!["Id", "ShelfId"], vec!["1", ""], vec!["2", "A"]],
        );
        let mut resolver = RelationshipResolver::new(&workbook, &snapshot);

        let mut shelves = vec![
            Shelf::default(),
            Shelf {
                code: Some("A".into()),
                ..Default::default()
            },
        ];
        resolver
            .include::<Shelf, Book>(&mut shelves, "Books")
            .await
            .unwrap();

        assert!(shelves[0].books.is_empty());
        let ids: Vec<i32> = shelves[1].books.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_navigation_is_schema_error() {
        let snapshot = snapshot();
        let workbook = workbook();
        let mut resolver = RelationshipResolver::new(&workbook, &snapshot);
        let mut products = vec![product(1, "Lamp", 10, 1)];

        let err = resolver
            .include::<Product, Category>(&mut products, "Supplier")
            .await
            .unwrap_err();
        assert!(matches!(err, SheetDbError::Schema(_)));
        assert!(workbook.calls().is_empty());
    }
}
