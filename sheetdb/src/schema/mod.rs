pub mod builder;
pub mod model;
pub mod parser;
pub mod types;

pub use builder::{resolve, SchemaBuilder};
pub use model::{EntityModel, FieldKind, FieldModel, ModelBuilder, ModelRegistry};
pub use parser::{parse_model, parse_model_str};
pub use types::*;
