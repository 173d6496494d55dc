use crate::entity::Entity;
use crate::error::{Result, SheetDbError};
use crate::schema::{ColumnSchema, DataType, EntitySchema};
use crate::value::Value;

/// Result of validating one entity
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Check an entity against its table's declared rules and its own rules.
///
/// `is_new` relaxes the required check on the primary key, which is
/// assigned during the save.
pub fn validate_entity<T: Entity>(entity: &T, schema: &EntitySchema, is_new: bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    for column in &schema.columns {
        let value = entity.get(&column.property_name);

        if is_missing(&value, column) {
            if column.is_primary_key && is_new {
                continue;
            }
            if !column.is_nullable {
                if column.default_value.is_some() {
                    result.warnings.push(format!(
                        "'{}' is empty; the column default will not be applied by the store",
                        column.property_name
                    ));
                } else {
                    result
                        .errors
                        .push(format!("'{}' is required", column.property_name));
                }
            }
            continue;
        }

        if !type_matches(&value, column.data_type) {
            result.errors.push(format!(
                "'{}' expected {:?}, got {:?}",
                column.property_name, column.data_type, value
            ));
            continue;
        }

        if let (Some(max), Some(text)) = (column.max_length, value.as_str()) {
            let len = text.chars().count();
            if len > max {
                result.errors.push(format!(
                    "'{}' is {} characters long (max {})",
                    column.property_name, len, max
                ));
            }
        }
    }

    result.errors.extend(entity.validate());
    result
}

fn is_missing(value: &Value, column: &ColumnSchema) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => column.data_type == DataType::String && s.is_empty(),
        _ => false,
    }
}

fn type_matches(value: &Value, data_type: DataType) -> bool {
    match (value, data_type) {
        (Value::Null, _) => true,
        (Value::Text(_), DataType::String) => true,
        (Value::Enum(_) | Value::Text(_), DataType::Enum) => true,
        (Value::Int(_), DataType::Int32 | DataType::Int64) => true,
        (Value::Int(_) | Value::Decimal(_), DataType::Decimal) => true,
        (Value::Int(_) | Value::Float(_), DataType::Double) => true,
        (Value::Bool(_), DataType::Boolean) => true,
        (Value::Timestamp(_), DataType::DateTime) => true,
        (Value::Date(_), DataType::Date) => true,
        _ => false,
    }
}

/// Validate a batch of entities, labelled for error messages. Warnings are
/// logged; any error rejects the whole batch.
pub fn validate_batch<'e, T, I>(schema: &EntitySchema, entries: I) -> Result<()>
where
    T: Entity,
    I: IntoIterator<Item = (String, &'e T, bool)>,
{
    let mut errors = Vec::new();
    for (label, entity, is_new) in entries {
        let result = validate_entity(entity, schema, is_new);
        for warning in &result.warnings {
            log::warn!("{} {}: {}", schema.table_name, label, warning);
        }
        errors.extend(result.errors.into_iter().map(|e| format!("{label}: {e}")));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SheetDbError::Validation {
            table: schema.table_name.clone(),
            errors,
        })
    }
}
