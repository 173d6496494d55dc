//! Snapshots, migration artifacts and applying schemas to the store.

pub mod diff;
pub mod script;
pub mod snapshot;

pub use diff::{diff_snapshots, unsafe_changes, SchemaChange};
pub use script::script;
pub use snapshot::{compute_model_hash, MigrationSnapshot, MIGRATION_ID_KEY, SNAPSHOT_VERSION};

use crate::config::SheetsOptions;
use crate::error::{Result, SheetDbError};
use crate::ids::METADATA_TABLE;
use crate::mapping::HeaderIndex;
use crate::provider::{CellRef, Row, SheetProvider};
use crate::schema::{ModelBuilder, ModelRegistry, SchemaBuilder};
use chrono::{Duration, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const HISTORY_TABLE: &str = "__sheetdb_history";
pub const HISTORY_HEADER: [&str; 4] = ["MigrationId", "AppliedAt", "Snapshot", "Hash"];

const ARTIFACT_PATTERN: &str = r"^(\d{14})_(.+)\.json$";
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A migration artifact file on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationArtifact {
    pub id: String,
    pub path: PathBuf,
}

/// One row of the in-store history table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub migration_id: String,
    pub applied_at: String,
    #[serde(skip)]
    pub snapshot_json: String,
    pub hash: String,
}

impl HistoryEntry {
    pub fn snapshot(&self) -> Result<MigrationSnapshot> {
        MigrationSnapshot::from_json(&self.snapshot_json)
    }
}

/// What one `apply` did to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub created: Vec<String>,
    pub altered: Vec<(String, Vec<String>)>,
    pub history_recorded: bool,
}

impl ApplyReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.altered.is_empty() && !self.history_recorded
    }
}

/// Owns the on-disk baseline and migration artifacts, and the in-store
/// schema and history.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    migrations_dir: PathBuf,
    snapshot_file: String,
}

impl SnapshotManager {
    pub fn new(options: &SheetsOptions) -> Self {
        SnapshotManager {
            migrations_dir: options.migrations_dir.clone(),
            snapshot_file: options.snapshot_file.clone(),
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.migrations_dir.join(&self.snapshot_file)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Derive the current snapshot from the registered model.
    pub fn build(&self, registry: &ModelRegistry, overrides: &ModelBuilder) -> Result<MigrationSnapshot> {
        let schemas = SchemaBuilder::new(registry, overrides).build_all()?;
        MigrationSnapshot::from_schemas(schemas)
    }

    /// Read the baseline. A missing baseline is the empty snapshot.
    pub fn load(&self) -> Result<MigrationSnapshot> {
        let path = self.baseline_path();
        if !path.exists() {
            log::debug!("No baseline at {}; starting from empty", path.display());
            return Ok(MigrationSnapshot::empty());
        }
        let content = std::fs::read_to_string(&path)?;
        MigrationSnapshot::from_json(&content)
    }

    /// Write a dated migration artifact and make it the new baseline.
    /// Returns the migration id.
    pub fn save(&self, snapshot: &mut MigrationSnapshot, label: &str) -> Result<String> {
        let slug = slug::slugify(label);
        if slug.is_empty() {
            return Err(SheetDbError::Migration(format!(
                "'{label}' is not usable as a migration name"
            )));
        }
        let id = format!("{}_{}", self.next_stamp()?, slug);

        snapshot.metadata.insert(MIGRATION_ID_KEY.to_string(), id.clone());
        snapshot.last_updated = Utc::now();
        let json = snapshot.to_json_pretty()?;

        std::fs::create_dir_all(&self.migrations_dir)?;
        std::fs::write(self.migrations_dir.join(format!("{id}.json")), &json)?;
        std::fs::write(self.baseline_path(), &json)?;

        log::info!("Saved migration '{id}'");
        Ok(id)
    }

    /// Fail when an applied baseline exists and the model no longer matches it.
    pub fn check_drift(&self, loaded: &MigrationSnapshot, current: &MigrationSnapshot) -> Result<()> {
        if !loaded.model_hash.is_empty() && loaded.model_hash != current.model_hash {
            return Err(SheetDbError::SchemaDrift {
                baseline: loaded.model_hash.clone(),
                current: current.model_hash.clone(),
            });
        }
        Ok(())
    }

    pub fn diff(&self, old: &MigrationSnapshot, new: &MigrationSnapshot) -> Vec<SchemaChange> {
        diff_snapshots(old, new)
    }

    pub fn script(&self, snapshot: &MigrationSnapshot) -> String {
        script(snapshot)
    }

    // ── Artifacts ────────────────────────────────────────────────────

    /// Timestamp for a new artifact. Always later than the newest existing
    /// artifact, so ids sort in creation order within the same second.
    fn next_stamp(&self) -> Result<String> {
        let now = Utc::now().format(STAMP_FORMAT).to_string();
        let newest = self.list()?.pop();
        let Some(previous) = newest.as_ref().and_then(|a| a.id.get(..14)) else {
            return Ok(now);
        };
        if previous < now.as_str() {
            return Ok(now);
        }
        let previous = NaiveDateTime::parse_from_str(previous, STAMP_FORMAT)
            .map_err(|e| SheetDbError::Migration(format!("Bad artifact timestamp '{previous}': {e}")))?;
        Ok((previous + Duration::seconds(1)).format(STAMP_FORMAT).to_string())
    }

    /// Migration artifacts, oldest first.
    pub fn list(&self) -> Result<Vec<MigrationArtifact>> {
        let pattern = Regex::new(ARTIFACT_PATTERN)
            .map_err(|e| SheetDbError::Migration(e.to_string()))?;
        let glob_pattern = self.migrations_dir.join("*.json");
        let entries = glob::glob(&glob_pattern.to_string_lossy())
            .map_err(|e| SheetDbError::Migration(e.to_string()))?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SheetDbError::Migration(e.to_string()))?;
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = pattern
                .captures(file_name)
                .and_then(|_| file_name.strip_suffix(".json"))
            {
                artifacts.push(MigrationArtifact {
                    id: id.to_string(),
                    path: path.clone(),
                });
            }
        }
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(artifacts)
    }

    /// Delete the newest artifact and roll the baseline back to the one
    /// before it (or delete the baseline). Returns the removed id.
    pub fn remove_last(&self) -> Result<String> {
        let mut artifacts = self.list()?;
        let last = artifacts
            .pop()
            .ok_or_else(|| SheetDbError::Migration("No migrations to remove".into()))?;
        std::fs::remove_file(&last.path)?;

        match artifacts.last() {
            Some(previous) => {
                std::fs::copy(&previous.path, self.baseline_path())?;
                log::info!("Removed '{}'; baseline is now '{}'", last.id, previous.id);
            }
            None => {
                let baseline = self.baseline_path();
                if baseline.exists() {
                    std::fs::remove_file(baseline)?;
                }
                log::info!("Removed '{}'; no migrations remain", last.id);
            }
        }
        Ok(last.id)
    }

    // ── Store ────────────────────────────────────────────────────────

    /// Bring the store's structure up to `snapshot` and record it in history.
    ///
    /// Tables are created with a header in column order; existing tables only
    /// gain missing columns at the end. Nothing is reordered or dropped.
    pub async fn apply(&self, provider: &dyn SheetProvider, snapshot: &MigrationSnapshot) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        for (table, schema) in &snapshot.entities {
            if !provider.sheet_exists(table).await? {
                provider.create_sheet(table, &schema.header()).await?;
                log::info!("Created sheet '{table}'");
                report.created.push(table.clone());
                continue;
            }

            let rows = provider.get_all_rows(table).await?;
            let header = rows.into_iter().next().unwrap_or_default();
            let index = HeaderIndex::from_header(&header);
            let missing: Vec<String> = schema
                .columns
                .iter()
                .filter(|c| index.position(&c.name).is_none())
                .map(|c| c.name.clone())
                .collect();

            for (offset, name) in missing.iter().enumerate() {
                let column = header.len() + offset + 1;
                let cell = CellRef::new(1, column as u32);
                provider.set_value(table, cell, name.clone()).await?;
            }
            if !missing.is_empty() {
                log::info!("Added columns to '{table}': {}", missing.join(", "));
                report.altered.push((table.clone(), missing));
            }
        }

        report.history_recorded = self.record_history(provider, snapshot).await?;
        Ok(report)
    }

    async fn record_history(&self, provider: &dyn SheetProvider, snapshot: &MigrationSnapshot) -> Result<bool> {
        if !provider.sheet_exists(HISTORY_TABLE).await? {
            let header: Vec<String> = HISTORY_HEADER.iter().map(|h| h.to_string()).collect();
            provider.create_sheet(HISTORY_TABLE, &header).await?;
            provider.hide_sheet(HISTORY_TABLE).await?;
        } else if let Some(last) = self.history(provider).await?.pop() {
            if last.hash == snapshot.model_hash {
                log::debug!("History already records hash {}", snapshot.model_hash);
                return Ok(false);
            }
        }

        let migration_id = snapshot
            .migration_id()
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().format(STAMP_FORMAT).to_string());
        let row = vec![
            migration_id.clone(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            serde_json::to_string(snapshot)?,
            snapshot.model_hash.clone(),
        ];
        provider.append_row(HISTORY_TABLE, row).await?;
        log::info!("Recorded migration '{migration_id}' in history");
        Ok(true)
    }

    /// Every applied migration, oldest first. No history table reads as none.
    pub async fn history(&self, provider: &dyn SheetProvider) -> Result<Vec<HistoryEntry>> {
        if !provider.sheet_exists(HISTORY_TABLE).await? {
            return Ok(Vec::new());
        }
        let rows = provider.get_all_rows(HISTORY_TABLE).await?;
        let cell = |row: &Row, i: usize| row.get(i).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .skip(1)
            .filter(|row| !crate::mapping::is_blank(row))
            .map(|row| HistoryEntry {
                migration_id: cell(row, 0),
                applied_at: cell(row, 1),
                snapshot_json: cell(row, 2),
                hash: cell(row, 3),
            })
            .collect())
    }

    pub async fn last_applied(&self, provider: &dyn SheetProvider) -> Result<Option<HistoryEntry>> {
        Ok(self.history(provider).await?.pop())
    }

    /// The most recently applied snapshot, for scaffolding code from a live store.
    pub async fn scaffold_source(&self, provider: &dyn SheetProvider) -> Result<MigrationSnapshot> {
        let last = self.last_applied(provider).await?.ok_or_else(|| {
            SheetDbError::Migration("The store has no migration history to scaffold from".into())
        })?;
        last.snapshot()
    }

    /// Delete every table of `snapshot` plus the internal tables.
    /// Returns the names of the sheets that were deleted.
    pub async fn drop(&self, provider: &dyn SheetProvider, snapshot: &MigrationSnapshot) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        let internal = [HISTORY_TABLE, METADATA_TABLE];
        let tables = snapshot
            .entities
            .keys()
            .map(String::as_str)
            .chain(internal);

        for table in tables {
            if provider.sheet_exists(table).await? {
                provider.delete_sheet(table).await?;
                dropped.push(table.to_string());
            }
        }
        log::info!("Dropped {} sheets", dropped.len());
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryWorkbook, ProviderCall};
    use crate::schema::{DataType, EntityModel, FieldModel};
    use crate::testing::{catalog_registry, product_model};
    use pretty_assertions::assert_eq;

    fn manager(dir: &Path) -> SnapshotManager {
        SnapshotManager::new(&SheetsOptions::default().with_migrations_dir(dir.join("Migrations")))
    }

    fn catalog(manager: &SnapshotManager) -> MigrationSnapshot {
        manager.build(&catalog_registry(), &ModelBuilder::new()).unwrap()
    }

    fn is_structural(call: &ProviderCall) -> bool {
        matches!(
            call,
            ProviderCall::CreateSheet { .. } | ProviderCall::SetValue { .. } | ProviderCall::DeleteSheet { .. }
        )
    }

    #[test]
    fn test_load_missing_baseline_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = manager(dir.path()).load().unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.entities.is_empty());
    }

    #[test]
    fn test_save_writes_artifact_and_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut snapshot = catalog(&manager);

        let id = manager.save(&mut snapshot, "Initial Create").unwrap();
        assert!(Regex::new(r"^\d{14}_initial-create$").unwrap().is_match(&id));
        assert_eq!(snapshot.migration_id(), Some(id.as_str()));

        let artifact = manager.migrations_dir().join(format!("{id}.json"));
        assert!(artifact.exists());
        let loaded = manager.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_save_rejects_unusable_label() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut snapshot = catalog(&manager);
        assert!(matches!(
            manager.save(&mut snapshot, "!!!"),
            Err(SheetDbError::Migration(_))
        ));
    }

    #[test]
    fn test_check_drift() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let current = catalog(&manager);

        assert!(manager.check_drift(&MigrationSnapshot::empty(), &current).is_ok());
        assert!(manager.check_drift(&current, &current).is_ok());
    }

    /// A field added to the model without generating a migration is drift.
    #[test]
    fn test_added_field_without_migration_is_drift() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut baseline = catalog(&manager);
        manager.save(&mut baseline, "init").unwrap();

        let mut registry = catalog_registry();
        registry.register(product_model().field(FieldModel::nullable("Sku", DataType::String)));
        let current = manager.build(&registry, &ModelBuilder::new()).unwrap();

        let loaded = manager.load().unwrap();
        match manager.check_drift(&loaded, &current) {
            Err(SheetDbError::SchemaDrift {
                baseline: old,
                current: new,
            }) => {
                assert_eq!(old, baseline.model_hash);
                assert_eq!(new, current.model_hash);
                let message = SheetDbError::SchemaDrift {
                    baseline: old.clone(),
                    current: new.clone(),
                }
                .to_string();
                assert!(message.contains(&old) && message.contains(&new));
            }
            other => panic!("Expected SchemaDrift, got {other:?}"),
        }
    }

    #[test]
    fn test_list_ignores_baseline_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let migrations = manager.migrations_dir();
        std::fs::create_dir_all(migrations).unwrap();
        for name in [
            "20250102000000_second.json",
            "20250101000000_first.json",
            "sheetdb_snapshot.json",
            "notes.json",
        ] {
            std::fs::write(migrations.join(name), "{}").unwrap();
        }

        let ids: Vec<String> = manager.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["20250101000000_first", "20250102000000_second"]);
    }

    #[test]
    fn test_saves_in_same_second_keep_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut snapshot = catalog(&manager);

        let first = manager.save(&mut snapshot, "zeta").unwrap();
        let second = manager.save(&mut snapshot, "alpha").unwrap();
        assert!(second > first);

        let ids: Vec<String> = manager.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first.clone(), second.clone()]);
        assert_eq!(manager.remove_last().unwrap(), second);
        assert_eq!(manager.load().unwrap().migration_id(), Some(first.as_str()));
    }

    #[test]
    fn test_next_stamp_steps_past_future_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let migrations = manager.migrations_dir();
        std::fs::create_dir_all(migrations).unwrap();
        std::fs::write(migrations.join("29991231235959_later.json"), "{}").unwrap();

        assert_eq!(manager.next_stamp().unwrap(), "30000101000000");
    }

    #[test]
    fn test_remove_last_restores_previous_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let migrations = manager.migrations_dir();
        std::fs::create_dir_all(migrations).unwrap();
        std::fs::write(migrations.join("20250101000000_first.json"), r#"{"modelHash":"one"}"#).unwrap();
        std::fs::write(migrations.join("20250102000000_second.json"), r#"{"modelHash":"two"}"#).unwrap();
        std::fs::write(manager.baseline_path(), r#"{"modelHash":"two"}"#).unwrap();

        assert_eq!(manager.remove_last().unwrap(), "20250102000000_second");
        assert_eq!(manager.load().unwrap().model_hash, "one");

        assert_eq!(manager.remove_last().unwrap(), "20250101000000_first");
        assert!(!manager.baseline_path().exists());
        assert!(manager.load().unwrap().is_empty());

        assert!(matches!(manager.remove_last(), Err(SheetDbError::Migration(_))));
    }

    #[tokio::test]
    async fn test_apply_creates_tables_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let workbook = MemoryWorkbook::new();
        let snapshot = catalog(&manager);

        let report = manager.apply(&workbook, &snapshot).await.unwrap();
        assert_eq!(report.created, vec!["Category", "Product"]);
        assert!(report.history_recorded);

        assert_eq!(
            workbook.rows("Product").unwrap(),
            vec![vec!["Id", "Title", "Price", "CategoryId"]]
        );
        assert!(workbook.is_hidden(HISTORY_TABLE));

        let history = manager.history(&workbook).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].hash, snapshot.model_hash);
        assert_eq!(history[0].snapshot().unwrap().entities, snapshot.entities);
    }

    #[tokio::test]
    async fn test_second_apply_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let workbook = MemoryWorkbook::new();
        let snapshot = catalog(&manager);

        manager.apply(&workbook, &snapshot).await.unwrap();
        workbook.clear_calls();

        let report = manager.apply(&workbook, &snapshot).await.unwrap();
        assert!(report.is_noop());
        assert!(!workbook.calls().iter().any(is_structural));
        assert!(workbook.mutations().is_empty());
        assert_eq!(manager.history(&workbook).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_appends_missing_columns_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        // Existing sheet: reordered, lower-cased, with an extra column.
        let workbook = MemoryWorkbook::new().with_sheet(
            "Product",
            vec![
                vec!["title", "Notes", "ID"],
                vec!["Lamp", "n/a", "1"],
            ],
        );

        let registry: ModelRegistry = vec![product_model()
            .field(FieldModel::nullable("Sku", DataType::String))]
        .into_iter()
        .chain(std::iter::once(crate::testing::category_model()))
        .collect();
        let snapshot = manager.build(&registry, &ModelBuilder::new()).unwrap();

        let report = manager.apply(&workbook, &snapshot).await.unwrap();
        assert_eq!(
            report.altered,
            vec![(
                "Product".to_string(),
                vec!["Price".to_string(), "CategoryId".to_string(), "Sku".to_string()]
            )]
        );
        assert_eq!(
            workbook.rows("Product").unwrap(),
            vec![
                vec!["title", "Notes", "ID", "Price", "CategoryId", "Sku"],
                vec!["Lamp", "n/a", "1"],
            ]
        );

        let set_cells: Vec<String> = workbook
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::SetValue { cell, .. } => Some(cell.to_a1()),
                _ => None,
            })
            .collect();
        assert_eq!(set_cells, vec!["D1", "E1", "F1"]);
    }

    #[tokio::test]
    async fn test_new_hash_appends_history_row() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let workbook = MemoryWorkbook::new();

        let mut first = catalog(&manager);
        manager.save(&mut first, "init").unwrap();
        manager.apply(&workbook, &first).await.unwrap();

        let mut registry = catalog_registry();
        registry.register(EntityModel::new("Tag").field(FieldModel::scalar("Id", DataType::Int32)));
        let mut second = manager.build(&registry, &ModelBuilder::new()).unwrap();
        second.metadata.insert(MIGRATION_ID_KEY.into(), "20990101000000_tags".into());
        manager.apply(&workbook, &second).await.unwrap();

        let history = manager.history(&workbook).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].migration_id, first.migration_id().unwrap());
        assert_eq!(history[1].migration_id, "20990101000000_tags");

        let scaffold = manager.scaffold_source(&workbook).await.unwrap();
        assert!(scaffold.entities.contains_key("Tag"));
    }

    #[tokio::test]
    async fn test_scaffold_without_history_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let workbook = MemoryWorkbook::new();
        assert!(manager.last_applied(&workbook).await.unwrap().is_none());
        assert!(matches!(
            manager.scaffold_source(&workbook).await,
            Err(SheetDbError::Migration(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_removes_model_and_internal_tables() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let workbook = MemoryWorkbook::new()
            .with_sheet("Unrelated", vec![vec!["A"]])
            .with_sheet(METADATA_TABLE, vec![vec!["TableName", "LastId"]]);
        let snapshot = catalog(&manager);
        manager.apply(&workbook, &snapshot).await.unwrap();

        let mut dropped = manager.drop(&workbook, &snapshot).await.unwrap();
        dropped.sort();
        assert_eq!(
            dropped,
            vec!["Category", "Product", HISTORY_TABLE, METADATA_TABLE]
        );
        assert_eq!(workbook.sheet_names(), vec!["Unrelated"]);
    }
}
