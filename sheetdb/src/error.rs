use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetDbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error(
        "Schema drift: model hash '{current}' does not match the applied baseline '{baseline}'. \
         Add a new migration before starting."
    )]
    SchemaDrift { baseline: String, current: String },

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Validation failed for '{table}':\n  - {}", errors.join("\n  - "))]
    Validation { table: String, errors: Vec<String> },

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Entity type '{0}' is not registered")]
    NotRegistered(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SheetDbError {
    /// Wrap an adapter failure as a remote operation error.
    pub fn remote(message: impl Into<String>) -> Self {
        SheetDbError::Remote(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SheetDbError>;
