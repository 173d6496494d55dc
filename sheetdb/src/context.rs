//! The entry point tying a model, a store and its migrations together.

use crate::config::SheetsOptions;
use crate::entity::Entity;
use crate::error::{Result, SheetDbError};
use crate::migration::{MigrationSnapshot, SnapshotManager};
use crate::provider::{self, SheetProvider};
use crate::relations::RelationshipResolver;
use crate::schema::{EntityModel, EntitySchema, ModelBuilder, ModelRegistry};
use crate::tracker::{SaveSummary, SheetSet};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A [`SheetSet`] with its entity type erased, so sets of different types
/// can be saved together.
#[async_trait]
trait ErasedSet: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn table(&self) -> &str;
    fn has_changes(&self) -> bool;
    async fn save(&mut self) -> Result<SaveSummary>;
}

#[async_trait]
impl<T: Entity> ErasedSet for SheetSet<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn table(&self) -> &str {
        SheetSet::table(self)
    }

    fn has_changes(&self) -> bool {
        SheetSet::has_changes(self)
    }

    async fn save(&mut self) -> Result<SaveSummary> {
        SheetSet::save(self).await
    }
}

type SetFactory = fn(Arc<dyn SheetProvider>, EntitySchema) -> Box<dyn ErasedSet>;

fn make_set<T: Entity>(provider: Arc<dyn SheetProvider>, schema: EntitySchema) -> Box<dyn ErasedSet> {
    Box::new(SheetSet::<T>::new(provider, schema))
}

struct Registration {
    type_id: TypeId,
    model: EntityModel,
    factory: SetFactory,
}

/// Collects the configuration of a [`SheetContext`].
#[derive(Default)]
pub struct SheetContextBuilder {
    provider: Option<Arc<dyn SheetProvider>>,
    options: SheetsOptions,
    overrides: ModelBuilder,
    registrations: Vec<Registration>,
}

impl SheetContextBuilder {
    /// Use an existing store. Without one, `initialize` opens the store named
    /// by the options' connection string.
    pub fn provider(mut self, provider: Arc<dyn SheetProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn options(mut self, options: SheetsOptions) -> Self {
        self.options = options;
        self
    }

    /// Register an entity type. Registering a type twice keeps one set.
    pub fn register<T: Entity>(mut self) -> Self {
        let type_id = TypeId::of::<T>();
        if self.registrations.iter().all(|r| r.type_id != type_id) {
            self.registrations.push(Registration {
                type_id,
                model: T::model(),
                factory: make_set::<T>,
            });
        }
        self
    }

    /// Apply fluent model overrides.
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut ModelBuilder),
    {
        configure(&mut self.overrides);
        self
    }

    /// Build the model, compare it with the applied baseline and create the
    /// sets. Fails with `SchemaDrift` when the model changed since the last
    /// migration was added.
    pub async fn initialize(self) -> Result<SheetContext> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => provider::open(&self.options.connection_string()?)?,
        };

        let registry: ModelRegistry = self.registrations.iter().map(|r| r.model.clone()).collect();
        let migrations = SnapshotManager::new(&self.options);
        let snapshot = migrations.build(&registry, &self.overrides)?;
        let baseline = migrations.load()?;
        migrations.check_drift(&baseline, &snapshot)?;

        let mut sets = Vec::with_capacity(self.registrations.len());
        let mut index = HashMap::new();
        for registration in &self.registrations {
            let schema = snapshot
                .entity_for_class(&registration.model.type_name)
                .cloned()
                .ok_or_else(|| SheetDbError::NotRegistered(registration.model.type_name.clone()))?;

            if !provider.sheet_exists(&schema.table_name).await? {
                log::warn!(
                    "Sheet '{}' does not exist yet; apply the migrations before saving",
                    schema.table_name
                );
            }

            index.insert(registration.type_id, sets.len());
            sets.push((registration.factory)(provider.clone(), schema));
        }

        log::debug!(
            "Context initialized with {} entity types (model hash {})",
            sets.len(),
            snapshot.model_hash
        );

        Ok(SheetContext {
            provider,
            snapshot,
            migrations,
            sets,
            index,
        })
    }
}

/// A unit of work over every registered table.
pub struct SheetContext {
    provider: Arc<dyn SheetProvider>,
    snapshot: MigrationSnapshot,
    migrations: SnapshotManager,
    sets: Vec<Box<dyn ErasedSet>>,
    index: HashMap<TypeId, usize>,
}

impl SheetContext {
    pub fn builder() -> SheetContextBuilder {
        SheetContextBuilder::default()
    }

    /// The tracked set for `T`.
    pub fn set<T: Entity>(&mut self) -> Result<&mut SheetSet<T>> {
        let slot = self
            .index
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| SheetDbError::NotRegistered(T::type_name()))?;
        self.sets[slot]
            .as_any_mut()
            .downcast_mut::<SheetSet<T>>()
            .ok_or_else(|| SheetDbError::NotRegistered(T::type_name()))
    }

    /// The snapshot of the model this context was built from.
    pub fn snapshot(&self) -> &MigrationSnapshot {
        &self.snapshot
    }

    pub fn migrations(&self) -> &SnapshotManager {
        &self.migrations
    }

    pub fn provider(&self) -> Arc<dyn SheetProvider> {
        self.provider.clone()
    }

    /// A resolver for loading navigations over this context's store.
    pub fn resolver(&self) -> RelationshipResolver<'_> {
        RelationshipResolver::new(self.provider.as_ref(), &self.snapshot)
    }

    pub fn has_changes(&self) -> bool {
        self.sets.iter().any(|s| s.has_changes())
    }

    /// Save every set with pending changes, in registration order.
    ///
    /// Stops at the first failing set; sets saved before it stay saved.
    pub async fn save_changes(&mut self) -> Result<SaveSummary> {
        let mut total = SaveSummary::default();
        for set in self.sets.iter_mut().filter(|s| s.has_changes()) {
            log::debug!("Saving '{}'", set.table());
            total += set.save().await?;
        }
        Ok(total)
    }

    /// Tables of the registered types, in registration order.
    pub fn tables(&self) -> Vec<&str> {
        self.sets.iter().map(|s| s.table()).collect()
    }

    /// Read-only access to the set for `T`.
    pub fn set_ref<T: Entity>(&self) -> Result<&SheetSet<T>> {
        self.index
            .get(&TypeId::of::<T>())
            .and_then(|&slot| self.sets[slot].as_any().downcast_ref::<SheetSet<T>>())
            .ok_or_else(|| SheetDbError::NotRegistered(T::type_name()))
    }
}
