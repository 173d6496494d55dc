//! Per-collection change tracking and the save pipeline.

use crate::entity::{Entity, Loaded};
use crate::error::{Result, SheetDbError};
use crate::ids::IdAllocator;
use crate::mapping::{entity_over_row, entity_to_row, is_blank, row_to_entity, HeaderIndex};
use crate::provider::{Row, RowHandle, SheetProvider};
use crate::schema::EntitySchema;
use crate::validation::validate_batch;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityState {
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// How a tracked entity is identified: by the row it was loaded from, or,
/// for entities not yet in the store, by the order they were added in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKey {
    Row(RowHandle),
    Pending(u64),
}

#[derive(Debug, Clone)]
struct Entry<T> {
    state: EntityState,
    entity: T,
    /// The row as last read, for entries loaded from the store.
    raw: Option<Row>,
}

/// Counts of what one save wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub deleted: usize,
    pub updated: usize,
    pub added: usize,
    /// Primary keys assigned to added entities, in insertion order.
    pub assigned_ids: Vec<i64>,
}

impl SaveSummary {
    pub fn total(&self) -> usize {
        self.deleted + self.updated + self.added
    }
}

impl AddAssign for SaveSummary {
    fn add_assign(&mut self, other: SaveSummary) {
        self.deleted += other.deleted;
        self.updated += other.updated;
        self.added += other.added;
        self.assigned_ids.extend(other.assigned_ids);
    }
}

/// The tracked contents of one table.
pub struct SheetSet<T: Entity> {
    provider: Arc<dyn SheetProvider>,
    schema: EntitySchema,
    header: Option<HeaderIndex>,
    entries: BTreeMap<EntryKey, Entry<T>>,
    next_pending: u64,
}

impl<T: Entity> SheetSet<T> {
    pub fn new(provider: Arc<dyn SheetProvider>, schema: EntitySchema) -> Self {
        SheetSet {
            provider,
            schema,
            header: None,
            entries: BTreeMap::new(),
            next_pending: 0,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.schema.table_name
    }

    // ── Tracking ─────────────────────────────────────────────────────

    /// Track a new entity for insertion.
    pub fn add(&mut self, entity: T) -> EntryKey {
        self.next_pending += 1;
        let key = EntryKey::Pending(self.next_pending);
        self.entries.insert(
            key,
            Entry {
                state: EntityState::Added,
                entity,
                raw: None,
            },
        );
        key
    }

    /// Mark a loaded entity as modified, taking its current field values.
    /// Entities already marked for deletion stay deleted.
    pub fn update(&mut self, loaded: &Loaded<T>) -> EntryKey {
        let key = EntryKey::Row(loaded.row);
        match self.entries.get_mut(&key) {
            Some(entry) if entry.state == EntityState::Deleted => {}
            Some(entry) => {
                if entry.state == EntityState::Unchanged {
                    entry.state = EntityState::Modified;
                }
                entry.entity = loaded.entity.clone();
            }
            None => {
                self.entries.insert(
                    key,
                    Entry {
                        state: EntityState::Modified,
                        entity: loaded.entity.clone(),
                        raw: None,
                    },
                );
            }
        }
        key
    }

    /// Replace the values of a pending (added) entity. Its state is unchanged.
    pub fn update_pending(&mut self, key: EntryKey, entity: T) -> Result<()> {
        match self.entries.get_mut(&key) {
            Some(entry) if matches!(key, EntryKey::Pending(_)) => {
                entry.entity = entity;
                Ok(())
            }
            _ => Err(SheetDbError::remote(format!(
                "{key:?} is not a pending entry of '{}'",
                self.schema.table_name
            ))),
        }
    }

    /// Mark a loaded entity for deletion.
    pub fn remove(&mut self, loaded: &Loaded<T>) -> EntryKey {
        let key = EntryKey::Row(loaded.row);
        match self.entries.get_mut(&key) {
            Some(entry) => entry.state = EntityState::Deleted,
            None => {
                self.entries.insert(
                    key,
                    Entry {
                        state: EntityState::Deleted,
                        entity: loaded.entity.clone(),
                        raw: None,
                    },
                );
            }
        }
        key
    }

    /// Mark any tracked entry for deletion.
    pub fn remove_entry(&mut self, key: EntryKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.state = EntityState::Deleted;
        }
    }

    /// Stop tracking an entry without writing anything.
    pub fn discard(&mut self, key: EntryKey) -> Option<T> {
        self.entries.remove(&key).map(|e| e.entity)
    }

    pub fn state(&self, key: EntryKey) -> EntityState {
        self.entries
            .get(&key)
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Every tracked entry and its state, in key order.
    pub fn tracked(&self) -> Vec<(EntryKey, EntityState)> {
        self.entries.iter().map(|(k, e)| (*k, e.state)).collect()
    }

    pub fn has_changes(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.state != EntityState::Unchanged)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // ── Queries ──────────────────────────────────────────────────────

    async fn read(&mut self) -> Result<Vec<(RowHandle, Row, T)>> {
        let rows = self.provider.get_all_rows(&self.schema.table_name).await?;
        let mut rows = rows.into_iter();
        let header = match rows.next() {
            Some(header) => HeaderIndex::from_header(&header),
            None => HeaderIndex::from_schema(&self.schema),
        };

        let loaded = rows
            .enumerate()
            .filter(|(_, row)| !is_blank(row))
            .map(|(i, row)| {
                // i is 0 for the first data row, which is row 2.
                let handle = RowHandle::from_index(i + 1);
                let entity = row_to_entity::<T>(&row, &self.schema, &header);
                (handle, row, entity)
            })
            .collect();

        self.header = Some(header);
        Ok(loaded)
    }

    /// Pending changes to an already tracked row are kept.
    fn track_loaded(&mut self, handle: RowHandle, raw: Row, entity: &T) {
        self.entries.entry(EntryKey::Row(handle)).or_insert(Entry {
            state: EntityState::Unchanged,
            entity: entity.clone(),
            raw: Some(raw),
        });
    }

    /// Load every row, tracking each entity as unchanged.
    pub async fn query(&mut self) -> Result<Vec<Loaded<T>>> {
        self.filter(|_| true).await
    }

    /// Load every row without tracking.
    pub async fn query_no_tracking(&mut self) -> Result<Vec<T>> {
        Ok(self.read().await?.into_iter().map(|(_, _, e)| e).collect())
    }

    /// Load the rows matching `predicate`, tracking only those.
    pub async fn filter<P>(&mut self, predicate: P) -> Result<Vec<Loaded<T>>>
    where
        P: Fn(&T) -> bool + Send,
    {
        let mut matching = Vec::new();
        for (row, raw, entity) in self.read().await? {
            if predicate(&entity) {
                self.track_loaded(row, raw, &entity);
                matching.push(Loaded::new(entity, row));
            }
        }
        log::debug!(
            "Loaded {} rows from '{}'",
            matching.len(),
            self.schema.table_name
        );
        Ok(matching)
    }

    pub async fn first<P>(&mut self, predicate: P) -> Result<Option<Loaded<T>>>
    where
        P: Fn(&T) -> bool + Send,
    {
        let found = self
            .read()
            .await?
            .into_iter()
            .find(|(_, _, e)| predicate(e));
        Ok(found.map(|(row, raw, entity)| {
            self.track_loaded(row, raw, &entity);
            Loaded::new(entity, row)
        }))
    }

    /// Find by primary key.
    pub async fn find(&mut self, key: impl Into<Value>) -> Result<Option<Loaded<T>>> {
        let pk = self
            .schema
            .primary_key()
            .map(|c| c.property_name.clone())
            .ok_or_else(|| {
                SheetDbError::Schema(format!(
                    "Table '{}' has no primary key",
                    self.schema.table_name
                ))
            })?;
        let wanted = key.into().to_cell();
        self.first(move |e| e.get(&pk).to_cell() == wanted).await
    }

    // ── Save ─────────────────────────────────────────────────────────

    /// Write all tracked changes: deletes (bottom row first), then updates,
    /// then inserts with freshly allocated ids.
    ///
    /// Validation runs before anything is written. Each entry stops being
    /// tracked once its own write succeeds, so if a store call fails the
    /// error is returned and only the unwritten changes are left tracked.
    pub async fn save(&mut self) -> Result<SaveSummary> {
        let table = self.schema.table_name.clone();
        let mut summary = SaveSummary::default();

        validate_batch(
            &self.schema,
            self.entries.iter().filter_map(|(key, entry)| {
                let label = match key {
                    EntryKey::Row(row) => format!("row {row}"),
                    EntryKey::Pending(n) => format!("new #{n}"),
                };
                match entry.state {
                    EntityState::Added => Some((label, &entry.entity, true)),
                    EntityState::Modified => Some((label, &entry.entity, false)),
                    _ => None,
                }
            }),
        )?;

        let header = self.physical_header().await?;

        // Delete phase
        let mut deletes: Vec<RowHandle> = Vec::new();
        let mut dropped: Vec<EntryKey> = Vec::new();
        for (key, entry) in &self.entries {
            if entry.state != EntityState::Deleted {
                continue;
            }
            match key {
                EntryKey::Row(row) => deletes.push(*row),
                EntryKey::Pending(n) => {
                    log::warn!("'{table}': pending entry #{n} was removed before it was saved; skipping");
                    dropped.push(*key);
                }
            }
        }
        for key in dropped {
            self.entries.remove(&key);
        }
        deletes.sort_unstable_by(|a, b| b.cmp(a));
        for row in deletes {
            log::debug!("'{table}': delete row {row}");
            self.provider.delete_row(&table, row).await?;
            self.entries.remove(&EntryKey::Row(row));
            summary.deleted += 1;
        }

        // Update phase
        let needs_current = self
            .entries
            .values()
            .any(|e| e.state == EntityState::Modified && e.raw.is_none());
        let current = if needs_current {
            self.provider.get_all_rows(&table).await?
        } else {
            Vec::new()
        };
        let updates: Vec<(RowHandle, Row)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == EntityState::Modified)
            .filter_map(|(key, e)| match key {
                EntryKey::Row(row) => {
                    // Untracked rows are rewritten over what the store holds now.
                    let base = e
                        .raw
                        .clone()
                        .or_else(|| current.get(row.index()).cloned())
                        .unwrap_or_default();
                    Some((*row, entity_over_row(&e.entity, &self.schema, &header, base)))
                }
                EntryKey::Pending(_) => None,
            })
            .collect();
        for (row, values) in updates {
            log::debug!("'{table}': update row {row}");
            self.provider.update_row(&table, row, values).await?;
            self.entries.remove(&EntryKey::Row(row));
            summary.updated += 1;
        }

        // Add phase
        let mut adds: Vec<(EntryKey, T)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == EntityState::Added)
            .map(|(key, e)| (*key, e.entity.clone()))
            .collect();
        if !adds.is_empty() {
            if let Some(pk) = self.schema.primary_key().map(|c| c.property_name.clone()) {
                let ids = IdAllocator::new(self.provider.as_ref())
                    .allocate(&table, adds.len())
                    .await?;
                for ((_, entity), id) in adds.iter_mut().zip(ids) {
                    entity.set(&pk, Value::Int(id));
                    summary.assigned_ids.push(id);
                }
            }
            for (key, entity) in &adds {
                let values = entity_to_row(entity, &self.schema, &header);
                self.provider.append_row(&table, values).await?;
                self.entries.remove(key);
                summary.added += 1;
            }
        }

        self.entries.clear();
        log::debug!(
            "'{table}': saved {} deleted, {} updated, {} added",
            summary.deleted,
            summary.updated,
            summary.added
        );
        Ok(summary)
    }

    /// Header captured at the last query, or read once now.
    async fn physical_header(&mut self) -> Result<HeaderIndex> {
        if let Some(header) = &self.header {
            return Ok(header.clone());
        }
        if !self.has_changes() {
            return Ok(HeaderIndex::from_schema(&self.schema));
        }
        let rows = self.provider.get_all_rows(&self.schema.table_name).await?;
        let header = rows
            .first()
            .map(|h| HeaderIndex::from_header(h))
            .unwrap_or_else(|| HeaderIndex::from_schema(&self.schema));
        self.header = Some(header.clone());
        Ok(header)
    }
}
