use crate::error::{Result, SheetDbError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MIGRATIONS_DIR: &str = "Migrations";
pub const DEFAULT_SNAPSHOT_FILE: &str = "sheetdb_snapshot.json";
pub const CONNECTION_ENV: &str = "SHEETDB_CONNECTION";

const DEFAULT_PROVIDER: &str = "GoogleSheets";

/// Options shared by the context and the migration tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetsOptions {
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_DIR)
}

fn default_snapshot_file() -> String {
    DEFAULT_SNAPSHOT_FILE.to_string()
}

impl Default for SheetsOptions {
    fn default() -> Self {
        SheetsOptions {
            connection: None,
            migrations_dir: default_migrations_dir(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

impl SheetsOptions {
    /// Load options from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_connection(mut self, connection: &str) -> Self {
        self.connection = Some(connection.to_string());
        self
    }

    /// Path of the baseline snapshot file inside the migrations directory.
    pub fn snapshot_path(&self) -> PathBuf {
        self.migrations_dir.join(&self.snapshot_file)
    }

    /// The parsed connection string, if one is configured.
    pub fn connection_string(&self) -> Result<ConnectionString> {
        match self.connection.as_deref() {
            Some(raw) => ConnectionString::parse(raw),
            None => Err(SheetDbError::MissingConfiguration(
                "no connection string configured".into(),
            )),
        }
    }
}

/// A `key=value;` connection string.
///
/// Keys are case-insensitive. Recognized keys and aliases:
/// `Provider`, `CredentialsPath` (`Credentials`, `Json_Path`),
/// `SpreadsheetId` (`Spreadsheet_Id`, `Id`), `MigrationPath` (`Migrations`)
/// and `Path` for local workbooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    provider: String,
    credentials_path: Option<String>,
    spreadsheet_id: Option<String>,
    migration_path: String,
    path: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(SheetDbError::MissingConfiguration(
                "connection string is empty".into(),
            ));
        }

        let mut conn = ConnectionString {
            provider: DEFAULT_PROVIDER.to_string(),
            credentials_path: None,
            spreadsheet_id: None,
            migration_path: DEFAULT_MIGRATIONS_DIR.to_string(),
            path: None,
        };

        for pair in raw.split(';').filter(|p| !p.trim().is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                log::warn!("Ignoring connection string segment without '=': '{pair}'");
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "provider" => conn.provider = value,
                "credentialspath" | "credentials" | "json_path" => {
                    conn.credentials_path = Some(value)
                }
                "spreadsheetid" | "spreadsheet_id" | "id" => conn.spreadsheet_id = Some(value),
                "migrationpath" | "migrations" => conn.migration_path = value,
                "path" => conn.path = Some(value),
                other => log::warn!("Ignoring unknown connection string key '{other}'"),
            }
        }

        Ok(conn)
    }

    /// Read the connection string from `SHEETDB_CONNECTION`.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(CONNECTION_ENV).map_err(|_| {
            SheetDbError::MissingConfiguration(format!("{CONNECTION_ENV} is not set"))
        })?;
        Self::parse(&raw)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn credentials_path(&self) -> Option<&str> {
        self.credentials_path.as_deref()
    }

    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.spreadsheet_id.as_deref()
    }

    pub fn migration_path(&self) -> &str {
        &self.migration_path
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Check that every setting the provider needs is present.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| {
            Err(SheetDbError::MissingConfiguration(format!(
                "{what} is required for provider '{}'",
                self.provider
            )))
        };

        if self.provider.trim().is_empty() {
            return Err(SheetDbError::MissingConfiguration(
                "Provider is required".into(),
            ));
        }
        match self.provider.to_ascii_lowercase().as_str() {
            "memory" => Ok(()),
            "sqlite" if self.path.as_deref().map_or(true, str::is_empty) => missing("Path"),
            "sqlite" => Ok(()),
            _ if self.credentials_path.as_deref().map_or(true, str::is_empty) => {
                missing("CredentialsPath")
            }
            _ if self.spreadsheet_id.as_deref().map_or(true, str::is_empty) => {
                missing("SpreadsheetId")
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        let conn = ConnectionString::parse(
            "JSON_PATH=/secrets/sa.json; id=1AbC ;Migrations=db/migrations;",
        )
        .unwrap();
        assert_eq!(conn.provider(), "GoogleSheets");
        assert_eq!(conn.credentials_path(), Some("/secrets/sa.json"));
        assert_eq!(conn.spreadsheet_id(), Some("1AbC"));
        assert_eq!(conn.migration_path(), "db/migrations");
        assert!(conn.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_setting() {
        let conn = ConnectionString::parse("Provider=GoogleSheets;CredentialsPath=sa.json").unwrap();
        let err = conn.validate().unwrap_err();
        assert!(matches!(err, SheetDbError::MissingConfiguration(ref m) if m.contains("SpreadsheetId")));

        let sqlite = ConnectionString::parse("Provider=sqlite").unwrap();
        assert!(sqlite.validate().is_err());
        let sqlite = ConnectionString::parse("Provider=sqlite;Path=book.db").unwrap();
        assert!(sqlite.validate().is_ok());
    }

    #[test]
    fn test_empty_connection_string() {
        assert!(matches!(
            ConnectionString::parse("  "),
            Err(SheetDbError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn test_options_defaults_and_yaml() {
        let defaults = SheetsOptions::default();
        assert_eq!(
            defaults.snapshot_path(),
            PathBuf::from("Migrations/sheetdb_snapshot.json")
        );
        assert!(defaults.connection_string().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheetdb.yaml");
        std::fs::write(
            &path,
            "connection: Provider=memory\nmigrations_dir: db/migrations\n",
        )
        .unwrap();
        let options = SheetsOptions::load(&path).unwrap();
        assert_eq!(options.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(options.snapshot_file, DEFAULT_SNAPSHOT_FILE);
        assert_eq!(options.connection_string().unwrap().provider(), "memory");
    }
}
