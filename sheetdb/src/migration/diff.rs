use super::snapshot::MigrationSnapshot;
use crate::schema::{DataType, EntitySchema};
use std::collections::BTreeSet;

/// Represents a single schema change detected between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    TableAdded { table: String },
    TableRemoved { table: String },
    ColumnAdded {
        table: String,
        column: String,
        nullable: bool,
        has_default: bool,
    },
    ColumnRemoved { table: String, column: String },
    TypeChanged {
        table: String,
        column: String,
        from: DataType,
        to: DataType,
    },
    PrimaryKeyChanged {
        table: String,
        from: Option<String>,
        to: Option<String>,
    },
    NullabilityChanged {
        table: String,
        column: String,
        nullable: bool,
    },
}

impl SchemaChange {
    /// Whether applying this change only adds structure.
    ///
    /// Apply never removes or retypes physical columns, so anything that is
    /// not additive leaves data behind that the new model won't read.
    pub fn is_safe(&self) -> bool {
        match self {
            SchemaChange::TableAdded { .. } => true,
            SchemaChange::ColumnAdded {
                nullable,
                has_default,
                ..
            } => *nullable || *has_default,
            SchemaChange::NullabilityChanged { nullable, .. } => *nullable,
            _ => false,
        }
    }

    /// Human-readable description of this change.
    pub fn describe(&self) -> String {
        match self {
            SchemaChange::TableAdded { table } => format!("Table '{table}' added"),
            SchemaChange::TableRemoved { table } => {
                format!("Table '{table}' removed from the model (sheet kept)")
            }
            SchemaChange::ColumnAdded {
                table,
                column,
                nullable,
                has_default,
            } => {
                let qualifier = if *has_default {
                    " (has default)"
                } else if *nullable {
                    " (optional)"
                } else {
                    " (required, existing rows read as zero values)"
                };
                format!("Column '{table}.{column}' added{qualifier}")
            }
            SchemaChange::ColumnRemoved { table, column } => {
                format!("Column '{table}.{column}' removed from the model (cells kept)")
            }
            SchemaChange::TypeChanged {
                table,
                column,
                from,
                to,
            } => format!("Column '{table}.{column}' type changed: {from:?} -> {to:?}"),
            SchemaChange::PrimaryKeyChanged { table, from, to } => format!(
                "Primary key of '{}' changed: {} -> {}",
                table,
                from.as_deref().unwrap_or("(none)"),
                to.as_deref().unwrap_or("(none)")
            ),
            SchemaChange::NullabilityChanged {
                table,
                column,
                nullable,
            } => {
                let now = if *nullable { "nullable" } else { "required" };
                format!("Column '{table}.{column}' is now {now}")
            }
        }
    }
}

/// Compare two snapshots and return the detected changes, ordered by table.
pub fn diff_snapshots(old: &MigrationSnapshot, new: &MigrationSnapshot) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    let tables: BTreeSet<&String> = old.entities.keys().chain(new.entities.keys()).collect();
    for table in tables {
        match (old.entities.get(table), new.entities.get(table)) {
            (None, Some(_)) => changes.push(SchemaChange::TableAdded {
                table: table.clone(),
            }),
            (Some(_), None) => changes.push(SchemaChange::TableRemoved {
                table: table.clone(),
            }),
            (Some(before), Some(after)) => diff_table(before, after, &mut changes),
            (None, None) => {}
        }
    }

    changes
}

fn diff_table(old: &EntitySchema, new: &EntitySchema, changes: &mut Vec<SchemaChange>) {
    let table = &new.table_name;

    // Columns added, in model order
    for column in &new.columns {
        if old.column(&column.name).is_none() {
            changes.push(SchemaChange::ColumnAdded {
                table: table.clone(),
                column: column.name.clone(),
                nullable: column.is_nullable,
                has_default: column.default_value.is_some(),
            });
        }
    }

    // Columns removed
    for column in &old.columns {
        if new.column(&column.name).is_none() {
            changes.push(SchemaChange::ColumnRemoved {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    // Columns in both
    for column in &new.columns {
        let Some(before) = old.column(&column.name) else {
            continue;
        };
        if before.data_type != column.data_type {
            changes.push(SchemaChange::TypeChanged {
                table: table.clone(),
                column: column.name.clone(),
                from: before.data_type,
                to: column.data_type,
            });
        }
        if before.is_nullable != column.is_nullable {
            changes.push(SchemaChange::NullabilityChanged {
                table: table.clone(),
                column: column.name.clone(),
                nullable: column.is_nullable,
            });
        }
    }

    let old_key = old.primary_key().map(|c| c.name.clone());
    let new_key = new.primary_key().map(|c| c.name.clone());
    if old_key != new_key {
        changes.push(SchemaChange::PrimaryKeyChanged {
            table: table.clone(),
            from: old_key,
            to: new_key,
        });
    }
}

/// The changes that would need manual attention.
pub fn unsafe_changes(changes: &[SchemaChange]) -> Vec<&SchemaChange> {
    changes.iter().filter(|c| !c.is_safe()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_model_str, ModelBuilder, SchemaBuilder};

    fn snapshot(yaml: &str) -> MigrationSnapshot {
        let registry = parse_model_str(yaml).unwrap();
        let schemas = SchemaBuilder::new(&registry, &ModelBuilder::new())
            .build_all()
            .unwrap();
        MigrationSnapshot::from_schemas(schemas).unwrap()
    }

    const BASE: &str = r#"
entities:
  Product:
    fields:
      Id: int
      Title: string?
      Price: decimal
"#;

    #[test]
    fn test_diff_no_changes() {
        let base = snapshot(BASE);
        assert!(diff_snapshots(&base, &base).is_empty());
    }

    #[test]
    fn test_diff_against_empty_adds_every_table() {
        let base = snapshot(BASE);
        let changes = diff_snapshots(&MigrationSnapshot::empty(), &base);
        assert_eq!(
            changes,
            vec![SchemaChange::TableAdded {
                table: "Product".into()
            }]
        );
        assert!(changes[0].is_safe());
    }

    #[test]
    fn test_diff_optional_column_added_is_safe() {
        let old = snapshot(BASE);
        let new = snapshot(&format!("{BASE}      Sku: string?\n"));

        let changes = diff_snapshots(&old, &new);
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            SchemaChange::ColumnAdded { column, nullable, .. } => {
                assert_eq!(column, "Sku");
                assert!(nullable);
            }
            other => panic!("Expected ColumnAdded, got {other:?}"),
        }
        assert!(changes[0].is_safe());
    }

    #[test]
    fn test_diff_required_column_without_default_is_unsafe() {
        let old = snapshot(BASE);
        let new = snapshot(&format!("{BASE}      Stock: int\n"));

        let changes = diff_snapshots(&old, &new);
        assert_eq!(unsafe_changes(&changes).len(), 1);
        assert!(changes[0].describe().contains("required"));
    }

    #[test]
    fn test_diff_removed_and_retyped() {
        let old = snapshot(BASE);
        let new = snapshot(
            r#"
entities:
  Product:
    fields:
      Id: int
      Price: double
"#,
        );

        let changes = diff_snapshots(&old, &new);
        assert!(changes.contains(&SchemaChange::ColumnRemoved {
            table: "Product".into(),
            column: "Title".into(),
        }));
        assert!(changes.contains(&SchemaChange::TypeChanged {
            table: "Product".into(),
            column: "Price".into(),
            from: DataType::Decimal,
            to: DataType::Double,
        }));
        assert!(changes.iter().all(|c| !c.is_safe()));
    }

    #[test]
    fn test_diff_key_and_nullability() {
        let old = snapshot(BASE);
        let new = snapshot(
            r#"
entities:
  Product:
    fields:
      Id: int
      Title: { type: string, key: true }
      Price: decimal?
"#,
        );

        let changes = diff_snapshots(&old, &new);
        assert!(changes.contains(&SchemaChange::PrimaryKeyChanged {
            table: "Product".into(),
            from: Some("Id".into()),
            to: Some("Title".into()),
        }));
        assert!(changes.contains(&SchemaChange::NullabilityChanged {
            table: "Product".into(),
            column: "Price".into(),
            nullable: true,
        }));
    }

    #[test]
    fn test_diff_table_removed() {
        let old = snapshot(&format!(
            "{BASE}  Tag:\n    fields:\n      Id: int\n"
        ));
        let new = snapshot(BASE);
        let changes = diff_snapshots(&old, &new);
        assert_eq!(
            changes,
            vec![SchemaChange::TableRemoved { table: "Tag".into() }]
        );
        assert!(changes[0].describe().contains("kept"));
    }
}
