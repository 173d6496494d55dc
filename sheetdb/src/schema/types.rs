use serde::{Deserialize, Serialize};

/// Declared data type of a column.
///
/// Serialized with the type names that appear in snapshot files, so existing
/// baselines keep hashing identically across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    String,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    DateTime,
    Date,
    Enum,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Decimal | DataType::Double
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Parse a type name as written in a model file (`string`, `int`, `decimal`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "string" | "text" => DataType::String,
            "int" | "int32" | "integer" => DataType::Int32,
            "long" | "int64" => DataType::Int64,
            "decimal" => DataType::Decimal,
            "double" | "float" | "number" => DataType::Double,
            "bool" | "boolean" => DataType::Boolean,
            "datetime" | "timestamp" => DataType::DateTime,
            "date" => DataType::Date,
            "enum" => DataType::Enum,
            _ => return None,
        };
        Some(ty)
    }
}

/// One store-facing column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    pub property_name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Schema of one table, derived from one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub table_name: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSchema>,
}

impl EntitySchema {
    pub fn primary_key(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.is_primary_key)
    }

    /// Column lookup by store-facing name, case-insensitive.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_for_property(&self, property: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.property_name == property)
    }

    pub fn header(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSchema {
    pub from_field: String,
    pub to_table: String,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
}
