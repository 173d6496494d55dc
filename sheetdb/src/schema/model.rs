//! Declared entity models and fluent overrides.
//!
//! An [`EntityModel`] is the explicit registration of one domain type: its
//! fields, their kinds and any attributes declared alongside the type. A
//! [`ModelBuilder`] carries configuration-time overrides that take precedence
//! over those attributes when the schema is derived.

use super::types::DataType;
use std::collections::{BTreeMap, HashMap};

/// What a field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A stored scalar value.
    Scalar { data_type: DataType, nullable: bool },
    /// A navigation to a single instance of another entity type.
    Reference(String),
    /// A navigation to a collection of another entity type.
    Collection(String),
}

impl FieldKind {
    pub fn is_navigation(&self) -> bool {
        !matches!(self, FieldKind::Scalar { .. })
    }

    /// Target type name for navigations.
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::Reference(t) | FieldKind::Collection(t) => Some(t),
            FieldKind::Scalar { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    pub name: String,
    pub kind: FieldKind,
    /// Declared column attribute.
    pub column: Option<String>,
    /// Declared key attribute.
    pub key: bool,
    /// Declared required attribute.
    pub required: Option<bool>,
    pub max_length: Option<usize>,
    pub default_value: Option<String>,
}

impl FieldModel {
    fn with_kind(name: &str, kind: FieldKind) -> Self {
        FieldModel {
            name: name.to_string(),
            kind,
            column: None,
            key: false,
            required: None,
            max_length: None,
            default_value: None,
        }
    }

    /// A non-nullable scalar field.
    pub fn scalar(name: &str, data_type: DataType) -> Self {
        Self::with_kind(
            name,
            FieldKind::Scalar {
                data_type,
                nullable: false,
            },
        )
    }

    /// A scalar field whose own type admits null (an `Option<_>` or a string).
    pub fn nullable(name: &str, data_type: DataType) -> Self {
        Self::with_kind(
            name,
            FieldKind::Scalar {
                data_type,
                nullable: true,
            },
        )
    }

    pub fn reference(name: &str, target: &str) -> Self {
        Self::with_kind(name, FieldKind::Reference(target.to_string()))
    }

    pub fn collection(name: &str, target: &str) -> Self {
        Self::with_kind(name, FieldKind::Collection(target.to_string()))
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self.kind {
            FieldKind::Scalar { data_type, .. } => Some(data_type),
            _ => None,
        }
    }
}

/// The registration of one domain type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityModel {
    pub type_name: String,
    pub namespace: String,
    /// Declared table attribute.
    pub table: Option<String>,
    /// Keyless types may be stored without a primary key.
    pub keyless: bool,
    pub fields: Vec<FieldModel>,
}

impl EntityModel {
    pub fn new(type_name: &str) -> Self {
        EntityModel {
            type_name: type_name.to_string(),
            namespace: String::new(),
            table: None,
            keyless: false,
            fields: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn keyless(mut self) -> Self {
        self.keyless = true;
        self
    }

    pub fn field(mut self, field: FieldModel) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn navigations(&self) -> impl Iterator<Item = &FieldModel> {
        self.fields.iter().filter(|f| f.kind.is_navigation())
    }
}

/// All registered entity types, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<EntityModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Registering the same type name twice replaces the
    /// earlier declaration in place.
    pub fn register(&mut self, model: EntityModel) {
        match self.models.iter_mut().find(|m| m.type_name == model.type_name) {
            Some(existing) => *existing = model,
            None => self.models.push(model),
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&EntityModel> {
        self.models.iter().find(|m| m.type_name == type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityModel> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<EntityModel> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = EntityModel>>(iter: I) -> Self {
        let mut registry = ModelRegistry::new();
        for model in iter {
            registry.register(model);
        }
        registry
    }
}

// ── Fluent overrides ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyOverrides {
    pub column: Option<String>,
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityOverrides {
    pub table: Option<String>,
    pub key: Option<String>,
    pub properties: BTreeMap<String, PropertyOverrides>,
}

/// Configuration-time overrides, keyed by type name.
///
/// ```
/// use sheetdb::schema::ModelBuilder;
///
/// let mut builder = ModelBuilder::new();
/// builder
///     .entity("Product")
///     .to_table("Catalog")
///     .property("Title")
///     .has_column_name("Name")
///     .is_required(true);
/// assert_eq!(builder.overrides("Product").unwrap().table.as_deref(), Some("Catalog"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    entities: HashMap<String, EntityOverrides>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&mut self, type_name: &str) -> EntityConfig<'_> {
        EntityConfig {
            overrides: self.entities.entry(type_name.to_string()).or_default(),
        }
    }

    pub fn overrides(&self, type_name: &str) -> Option<&EntityOverrides> {
        self.entities.get(type_name)
    }
}

pub struct EntityConfig<'a> {
    overrides: &'a mut EntityOverrides,
}

impl<'a> EntityConfig<'a> {
    pub fn to_table(self, table: &str) -> Self {
        self.overrides.table = Some(table.to_string());
        self
    }

    pub fn has_key(self, field: &str) -> Self {
        self.overrides.key = Some(field.to_string());
        self
    }

    pub fn property(self, field: &str) -> PropertyConfig<'a> {
        PropertyConfig {
            overrides: self
                .overrides
                .properties
                .entry(field.to_string())
                .or_default(),
        }
    }
}

pub struct PropertyConfig<'a> {
    overrides: &'a mut PropertyOverrides,
}

impl PropertyConfig<'_> {
    pub fn has_column_name(self, column: &str) -> Self {
        self.overrides.column = Some(column.to_string());
        self
    }

    pub fn is_required(self, required: bool) -> Self {
        self.overrides.required = Some(required);
        self
    }
}
