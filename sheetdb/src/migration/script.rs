use super::snapshot::MigrationSnapshot;
use std::fmt::Write as _;

/// Plain-text description of every table in a snapshot.
///
/// ```text
/// Sheet: Product
///   - Id (Int32) [PK]
///   - CategoryId (Int64) [FK -> Category]
/// ```
pub fn script(snapshot: &MigrationSnapshot) -> String {
    let mut out = String::new();
    if let Some(id) = snapshot.migration_id() {
        let _ = writeln!(out, "-- Migration: {id}");
    }
    let _ = writeln!(out, "-- Model hash: {}", snapshot.model_hash);

    for schema in snapshot.entities.values() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Sheet: {}", schema.table_name);
        for column in &schema.columns {
            let mut flags = Vec::new();
            if column.is_primary_key {
                flags.push("PK".to_string());
            }
            if let Some(related) = column.related_table.as_deref().filter(|_| column.is_foreign_key) {
                flags.push(format!("FK -> {related}"));
            }
            if !column.is_nullable && !column.is_primary_key {
                flags.push("required".to_string());
            }
            if let Some(max) = column.max_length {
                flags.push(format!("max {max}"));
            }
            if let Some(default) = &column.default_value {
                flags.push(format!("default '{default}'"));
            }

            let _ = write!(out, "  - {} ({:?})", column.name, column.data_type);
            for flag in flags {
                let _ = write!(out, " [{flag}]");
            }
            let _ = writeln!(out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelBuilder, SchemaBuilder};
    use crate::testing::catalog_registry;

    #[test]
    fn test_script_lists_every_column() {
        let registry = catalog_registry();
        let schemas = SchemaBuilder::new(&registry, &ModelBuilder::new())
            .build_all()
            .unwrap();
        let snapshot = MigrationSnapshot::from_schemas(schemas).unwrap();
        let text = script(&snapshot);

        let category = text.find("Sheet: Category").unwrap();
        let product = text.find("Sheet: Product").unwrap();
        assert!(category < product);
        assert!(text.contains("  - Id (Int32) [PK]\n"));
        assert!(text.contains("  - Title (String)\n"));
        assert!(text.contains("  - CategoryId (Int64) [FK -> Category] [required]\n"));
    }
}
