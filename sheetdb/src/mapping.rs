//! Conversion between entities and physical rows.

use crate::entity::Entity;
use crate::provider::Row;
use crate::schema::EntitySchema;
use crate::value::Value;
use std::collections::HashMap;

/// Positions of schema columns within a physical header row.
///
/// Header cells are matched case-insensitively, so a sheet whose columns
/// were reordered or extended by migration still maps each value to the
/// right cell.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    width: usize,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn from_header(header: &[String]) -> Self {
        let mut positions = HashMap::new();
        for (i, name) in header.iter().enumerate() {
            let key = name.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            // First occurrence wins.
            positions.entry(key).or_insert(i);
        }
        HeaderIndex {
            width: header.len(),
            positions,
        }
    }

    /// Index for a sheet laid out exactly in schema order.
    pub fn from_schema(schema: &EntitySchema) -> Self {
        Self::from_header(&schema.header())
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(&column.to_lowercase()).copied()
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Build a physical row for an entity, aligned to the header.
///
/// Columns missing from the header are appended after it in schema order,
/// which is where a pending migration would place them.
pub fn entity_to_row<T: Entity>(entity: &T, schema: &EntitySchema, header: &HeaderIndex) -> Row {
    entity_over_row(entity, schema, header, Row::new())
}

/// Like [`entity_to_row`], but starting from the row as it was read, so
/// cells of columns the schema doesn't know keep their content.
pub fn entity_over_row<T: Entity>(
    entity: &T,
    schema: &EntitySchema,
    header: &HeaderIndex,
    mut row: Row,
) -> Row {
    if row.len() < header.width() {
        row.resize(header.width(), String::new());
    }
    let mut trailing = Vec::new();
    for column in &schema.columns {
        let cell = entity.get(&column.property_name).to_cell();
        match header.position(&column.name) {
            Some(i) => row[i] = cell,
            None => trailing.push(cell),
        }
    }
    if !trailing.is_empty() {
        row.truncate(header.width());
        row.extend(trailing);
    }
    row
}

/// Materialize an entity from a physical row.
pub fn row_to_entity<T: Entity>(row: &[String], schema: &EntitySchema, header: &HeaderIndex) -> T {
    let mut entity = T::default();
    for column in &schema.columns {
        let raw = header
            .position(&column.name)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("");
        let value = Value::from_cell(raw, column.data_type);
        if !value.is_null() {
            entity.set(&column.property_name, value);
        }
    }
    entity
}

/// True for rows with no non-blank cell (gaps left in a sheet).
pub fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}
