use super::model::{EntityModel, FieldModel, ModelRegistry};
use super::types::DataType;
use crate::error::{Result, SheetDbError};
use serde::Deserialize;
use std::path::Path;

/// Top-level layout of a `model.yaml` file. Entity and field order in the
/// file is registration and column order.
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    entities: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct EntityDefinition {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    keyless: bool,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    fields: serde_yaml::Mapping,
}

/// A field is either a bare type name (`decimal`, `string?`) or a map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldDefinition {
    Short(String),
    Full(FullField),
}

#[derive(Debug, Deserialize)]
struct FullField {
    #[serde(rename = "type", default)]
    field_type: Option<String>,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    key: bool,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default)]
    many: Option<String>,
}

/// Parse a model.yaml file into a registry
pub fn parse_model(path: &Path) -> Result<ModelRegistry> {
    let content = std::fs::read_to_string(path)?;
    parse_model_str(&content)
}

/// Parse a model YAML string into a registry
pub fn parse_model_str(content: &str) -> Result<ModelRegistry> {
    let file: ModelFile = serde_yaml::from_str(content)?;
    let mut registry = ModelRegistry::new();

    for (name, body) in file.entities {
        let type_name = mapping_key(&name)?;
        let definition: EntityDefinition = serde_yaml::from_value(body)?;

        let mut model = EntityModel::new(&type_name)
            .namespace(definition.namespace.as_deref().unwrap_or(&file.namespace));
        if let Some(table) = &definition.table {
            model = model.table(table);
        }
        if definition.keyless {
            model = model.keyless();
        }

        for (field_name, field_body) in definition.fields {
            let field_name = mapping_key(&field_name)?;
            let field: FieldDefinition = serde_yaml::from_value(field_body)?;
            model = model.field(to_field_model(&type_name, &field_name, field)?);
        }

        registry.register(model);
    }

    Ok(registry)
}

fn mapping_key(key: &serde_yaml::Value) -> Result<String> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| SheetDbError::Schema(format!("Expected a name, found {key:?}")))
}

fn parse_type(type_name: &str, field_name: &str, raw: &str) -> Result<(DataType, bool)> {
    let (raw, nullable) = match raw.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (raw, false),
    };
    DataType::from_name(raw.trim())
        .map(|ty| (ty, nullable))
        .ok_or_else(|| {
            SheetDbError::Schema(format!(
                "{type_name}.{field_name}: unknown type '{raw}'"
            ))
        })
}

fn to_field_model(type_name: &str, field_name: &str, field: FieldDefinition) -> Result<FieldModel> {
    let full = match field {
        FieldDefinition::Short(raw) => {
            let (ty, nullable) = parse_type(type_name, field_name, &raw)?;
            return Ok(scalar(field_name, ty, nullable));
        }
        FieldDefinition::Full(full) => full,
    };

    if let Some(target) = &full.reference {
        return Ok(FieldModel::reference(field_name, target));
    }
    if let Some(target) = &full.many {
        return Ok(FieldModel::collection(field_name, target));
    }

    let raw_type = full.field_type.as_deref().ok_or_else(|| {
        SheetDbError::Schema(format!(
            "{type_name}.{field_name}: a field needs 'type', 'ref' or 'many'"
        ))
    })?;
    let (ty, nullable) = parse_type(type_name, field_name, raw_type)?;

    let mut model = scalar(field_name, ty, nullable || full.nullable);
    if full.key {
        model = model.key();
    }
    if let Some(required) = full.required {
        model = model.required(required);
    }
    if let Some(column) = &full.column {
        model = model.column(column);
    }
    if let Some(max) = full.max_length {
        model = model.max_length(max);
    }
    if let Some(default) = &full.default {
        model = model.default_value(&yaml_scalar(default));
    }
    Ok(model)
}

fn scalar(name: &str, ty: DataType, nullable: bool) -> FieldModel {
    if nullable {
        FieldModel::nullable(name, ty)
    } else {
        FieldModel::scalar(name, ty)
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(true) => "TRUE".to_string(),
        serde_yaml::Value::Bool(false) => "FALSE".to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
