//! Derivation of table schemas from registered entity models.

use super::model::{EntityModel, FieldKind, FieldModel, ModelBuilder, ModelRegistry};
use super::types::{ColumnSchema, EntitySchema, RelationshipKind, RelationshipSchema};
use crate::error::{Result, SheetDbError};
use std::collections::HashMap;

/// Ordered merge over the three configuration sources: a fluent override
/// wins over a declared attribute, which wins over the convention.
pub fn resolve<T>(fluent: Option<T>, attribute: Option<T>, convention: T) -> T {
    fluent.or(attribute).unwrap_or(convention)
}

/// Turns registered entity models (plus fluent overrides) into table schemas.
pub struct SchemaBuilder<'a> {
    registry: &'a ModelRegistry,
    overrides: &'a ModelBuilder,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(registry: &'a ModelRegistry, overrides: &'a ModelBuilder) -> Self {
        SchemaBuilder {
            registry,
            overrides,
        }
    }

    /// Build the schema of every registered type, in registration order.
    pub fn build_all(&self) -> Result<Vec<EntitySchema>> {
        let schemas = self
            .registry
            .iter()
            .map(|model| self.build(model))
            .collect::<Result<Vec<_>>>()?;

        let mut seen: HashMap<String, &str> = HashMap::new();
        for schema in &schemas {
            if let Some(other) = seen.insert(schema.table_name.to_lowercase(), &schema.class_name)
            {
                return Err(SheetDbError::Schema(format!(
                    "Types '{}' and '{}' both map to table '{}'",
                    other, schema.class_name, schema.table_name
                )));
            }
        }
        Ok(schemas)
    }

    /// Resolved table name for a registered type. Unregistered types fall
    /// back to their type name.
    pub fn table_name(&self, type_name: &str) -> String {
        let fluent = self
            .overrides
            .overrides(type_name)
            .and_then(|o| o.table.clone());
        let attribute = self.registry.get(type_name).and_then(|m| m.table.clone());
        resolve(fluent, attribute, type_name.to_string())
    }

    /// Build one table schema.
    pub fn build(&self, model: &EntityModel) -> Result<EntitySchema> {
        let overrides = self.overrides.overrides(&model.type_name);
        let table_name = self.table_name(&model.type_name);
        let key_field = self.resolve_key(model)?;

        let mut columns: Vec<ColumnSchema> = Vec::new();
        let mut relationships = Vec::new();

        for field in &model.fields {
            let FieldKind::Scalar {
                data_type,
                nullable,
            } = field.kind
            else {
                continue;
            };

            let property = overrides.and_then(|o| o.properties.get(&field.name));
            let name = resolve(
                property.and_then(|p| p.column.clone()),
                field.column.clone(),
                field.name.clone(),
            );
            let required = resolve(
                property.and_then(|p| p.required),
                field.required,
                !nullable,
            );

            if let Some(existing) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(&name)) {
                return Err(SheetDbError::Schema(format!(
                    "Table '{}': fields '{}' and '{}' both map to column '{}'",
                    table_name, existing.property_name, field.name, name
                )));
            }

            let is_primary_key = key_field.as_deref() == Some(field.name.as_str());
            let mut column = ColumnSchema {
                name,
                property_name: field.name.clone(),
                data_type,
                is_primary_key,
                is_foreign_key: false,
                is_nullable: !required,
                max_length: field.max_length,
                related_table: None,
                default_value: field.default_value.clone(),
            };

            if !is_primary_key {
                if let Some(navigation) = sibling_navigation(model, &field.name) {
                    if let Some(target) = navigation.kind.target() {
                        let related_table = self.table_name(target);
                        column.is_foreign_key = true;
                        column.related_table = Some(related_table.clone());
                        relationships.push(RelationshipSchema {
                            from_field: field.name.clone(),
                            to_table: related_table,
                            kind: self.relationship_kind(model, target),
                        });
                    }
                }
            }

            columns.push(column);
        }

        log::debug!(
            "Built schema for '{}' -> table '{}' ({} columns)",
            model.type_name,
            table_name,
            columns.len()
        );

        Ok(EntitySchema {
            table_name,
            class_name: model.type_name.clone(),
            namespace: model.namespace.clone(),
            columns,
            relationships,
        })
    }

    fn resolve_key(&self, model: &EntityModel) -> Result<Option<String>> {
        let scalars: Vec<&FieldModel> = model
            .fields
            .iter()
            .filter(|f| !f.kind.is_navigation())
            .collect();

        let fluent = match self
            .overrides
            .overrides(&model.type_name)
            .and_then(|o| o.key.as_deref())
        {
            Some(key) => match scalars.iter().find(|f| f.name == key) {
                Some(field) => Some(field.name.clone()),
                None => {
                    return Err(SheetDbError::Schema(format!(
                        "Key '{}' configured for '{}' is not a stored field",
                        key, model.type_name
                    )))
                }
            },
            None => None,
        };

        let declared: Vec<&&FieldModel> = scalars.iter().filter(|f| f.key).collect();
        if declared.len() > 1 {
            let names: Vec<&str> = declared.iter().map(|f| f.name.as_str()).collect();
            return Err(SheetDbError::Schema(format!(
                "Type '{}' declares more than one key: {}",
                model.type_name,
                names.join(", ")
            )));
        }
        let attribute = declared.first().map(|f| f.name.clone());

        let conventional_name = format!("{}Id", model.type_name);
        let convention = scalars
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("Id"))
            .or_else(|| {
                scalars
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case(&conventional_name))
            })
            .map(|f| f.name.clone());

        let key = resolve(fluent.map(Some), attribute.map(Some), convention);
        if key.is_none() && !model.keyless {
            return Err(SheetDbError::Schema(format!(
                "Type '{}' has no primary key; declare one or mark the type keyless",
                model.type_name
            )));
        }
        Ok(key)
    }

    /// ManyToOne when the target declares a collection back to the source.
    fn relationship_kind(&self, source: &EntityModel, target: &str) -> RelationshipKind {
        let back_collection = self.registry.get(target).is_some_and(|t| {
            t.fields
                .iter()
                .any(|f| f.kind == FieldKind::Collection(source.type_name.clone()))
        });
        if back_collection {
            RelationshipKind::ManyToOne
        } else {
            RelationshipKind::OneToOne
        }
    }
}

/// Navigation field `<X>` paired with a foreign-key candidate `<X>Id`.
fn sibling_navigation<'m>(model: &'m EntityModel, field_name: &str) -> Option<&'m FieldModel> {
    let len = field_name.len();
    if len <= 2 || !field_name.is_char_boundary(len - 2) {
        return None;
    }
    let (prefix, suffix) = field_name.split_at(len - 2);
    if !suffix.eq_ignore_ascii_case("id") {
        return None;
    }
    model
        .navigations()
        .find(|f| f.name.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::DataType;
    use crate::testing::{catalog_registry, category_model, product_model};
    use pretty_assertions::assert_eq;

    fn build_one(registry: &ModelRegistry, overrides: &ModelBuilder, name: &str) -> Result<EntitySchema> {
        SchemaBuilder::new(registry, overrides).build(registry.get(name).unwrap())
    }

    #[test]
    fn test_resolve_order() {
        assert_eq!(resolve(Some(1), Some(2), 3), 1);
        assert_eq!(resolve(None, Some(2), 3), 2);
        assert_eq!(resolve(None, None, 3), 3);
    }

    #[test]
    fn test_conventions() {
        let registry = catalog_registry();
        let schema = build_one(&registry, &ModelBuilder::new(), "Product").unwrap();

        assert_eq!(schema.table_name, "Product");
        assert_eq!(
            schema.header(),
            vec!["Id", "Title", "Price", "CategoryId"]
        );
        assert_eq!(schema.primary_key().unwrap().name, "Id");

        let fk = schema.column("CategoryId").unwrap();
        assert!(fk.is_foreign_key);
        assert_eq!(fk.related_table.as_deref(), Some("Category"));
        assert_eq!(
            schema.relationships,
            vec![RelationshipSchema {
                from_field: "CategoryId".into(),
                to_table: "Category".into(),
                kind: RelationshipKind::ManyToOne,
            }]
        );
    }

    #[test]
    fn test_one_to_one_without_back_collection() {
        let registry: ModelRegistry = vec![
            product_model(),
            EntityModel::new("Category")
                .field(FieldModel::scalar("Id", DataType::Int64))
                .field(FieldModel::nullable("Name", DataType::String)),
        ]
        .into_iter()
        .collect();

        let schema = build_one(&registry, &ModelBuilder::new(), "Product").unwrap();
        assert_eq!(schema.relationships[0].kind, RelationshipKind::OneToOne);
    }

    #[test]
    fn test_type_name_key_convention() {
        let registry: ModelRegistry = vec![EntityModel::new("Order")
            .field(FieldModel::scalar("OrderId", DataType::Int32))
            .field(FieldModel::nullable("Note", DataType::String))]
        .into_iter()
        .collect();

        let schema = build_one(&registry, &ModelBuilder::new(), "Order").unwrap();
        assert_eq!(schema.primary_key().unwrap().property_name, "OrderId");
        assert!(!schema.column("OrderId").unwrap().is_foreign_key);
    }

    #[test]
    fn test_fluent_beats_attribute_beats_convention() {
        let registry: ModelRegistry = vec![EntityModel::new("Product")
            .table("Items")
            .field(FieldModel::scalar("Id", DataType::Int32))
            .field(FieldModel::nullable("Sku", DataType::String).key())
            .field(FieldModel::nullable("Code", DataType::String))
            .field(FieldModel::nullable("Title", DataType::String).column("Label"))
            .field(FieldModel::nullable("Note", DataType::String).required(true))]
        .into_iter()
        .collect();

        let plain = build_one(&registry, &ModelBuilder::new(), "Product").unwrap();
        assert_eq!(plain.table_name, "Items");
        assert_eq!(plain.primary_key().unwrap().name, "Sku");
        assert!(plain.column("Label").is_some());
        assert!(!plain.column("Note").unwrap().is_nullable);

        let mut fluent = ModelBuilder::new();
        fluent.entity("Product").to_table("Catalog").has_key("Code");
        fluent
            .entity("Product")
            .property("Title")
            .has_column_name("Heading");
        fluent.entity("Product").property("Note").is_required(false);

        let overridden = build_one(&registry, &fluent, "Product").unwrap();
        assert_eq!(overridden.table_name, "Catalog");
        assert_eq!(overridden.primary_key().unwrap().name, "Code");
        assert!(overridden.column("Heading").is_some());
        assert!(overridden.column("Note").unwrap().is_nullable);
    }

    #[test]
    fn test_fluent_table_flows_into_related_table() {
        let registry = catalog_registry();
        let mut fluent = ModelBuilder::new();
        fluent.entity("Category").to_table("Categories");

        let schema = build_one(&registry, &fluent, "Product").unwrap();
        assert_eq!(
            schema.column("CategoryId").unwrap().related_table.as_deref(),
            Some("Categories")
        );
    }

    #[test]
    fn test_duplicate_column_names_rejected() {
        let registry: ModelRegistry = vec![EntityModel::new("Product")
            .field(FieldModel::scalar("Id", DataType::Int32))
            .field(FieldModel::nullable("Title", DataType::String))
            .field(FieldModel::nullable("Name", DataType::String).column("title"))]
        .into_iter()
        .collect();

        let err = build_one(&registry, &ModelBuilder::new(), "Product").unwrap_err();
        assert!(matches!(err, SheetDbError::Schema(msg) if msg.contains("title")));
    }

    #[test]
    fn test_multiple_key_attributes_rejected() {
        let registry: ModelRegistry = vec![EntityModel::new("Pair")
            .field(FieldModel::scalar("Left", DataType::Int32).key())
            .field(FieldModel::scalar("Right", DataType::Int32).key())]
        .into_iter()
        .collect();

        assert!(matches!(
            build_one(&registry, &ModelBuilder::new(), "Pair"),
            Err(SheetDbError::Schema(_))
        ));
    }

    #[test]
    fn test_unknown_fluent_key_rejected() {
        let registry = catalog_registry();
        let mut fluent = ModelBuilder::new();
        fluent.entity("Category").has_key("Products");

        assert!(matches!(
            build_one(&registry, &fluent, "Category"),
            Err(SheetDbError::Schema(_))
        ));
    }

    #[test]
    fn test_missing_key_and_keyless() {
        let keyed: ModelRegistry = vec![EntityModel::new("LogLine")
            .field(FieldModel::nullable("Message", DataType::String))]
        .into_iter()
        .collect();
        assert!(build_one(&keyed, &ModelBuilder::new(), "LogLine").is_err());

        let keyless: ModelRegistry = vec![EntityModel::new("LogLine")
            .keyless()
            .field(FieldModel::nullable("Message", DataType::String))]
        .into_iter()
        .collect();
        let schema = build_one(&keyless, &ModelBuilder::new(), "LogLine").unwrap();
        assert!(schema.primary_key().is_none());
    }

    #[test]
    fn test_duplicate_table_names_rejected() {
        let registry: ModelRegistry = vec![
            category_model(),
            EntityModel::new("Group")
                .table("category")
                .field(FieldModel::scalar("Id", DataType::Int32)),
        ]
        .into_iter()
        .collect();

        assert!(SchemaBuilder::new(&registry, &ModelBuilder::new())
            .build_all()
            .is_err());
    }
}
