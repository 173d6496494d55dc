pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod ids;
pub mod mapping;
pub mod migration;
pub mod provider;
pub mod relations;
pub mod schema;
pub mod tracker;
pub mod validation;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConnectionString, SheetsOptions};
pub use context::{SheetContext, SheetContextBuilder};
pub use entity::{Entity, Loaded, Navigate};
pub use error::{Result, SheetDbError};
pub use ids::IdAllocator;
pub use migration::{MigrationSnapshot, SnapshotManager};
pub use provider::{RowHandle, SheetProvider};
pub use relations::RelationshipResolver;
pub use schema::{DataType, EntityModel, EntitySchema, FieldModel, ModelBuilder};
pub use tracker::{EntityState, EntryKey, SaveSummary, SheetSet};
pub use value::Value;
