use crate::provider::RowHandle;
use crate::schema::EntityModel;
use crate::value::Value;

/// A domain type stored as rows of one table.
///
/// Implementations register their shape once through [`Entity::model`] and
/// expose their scalar fields by name. Navigation fields are not read or
/// written through `get`/`set`; see [`Navigate`].
pub trait Entity: Default + Clone + Send + Sync + 'static {
    fn model() -> EntityModel;

    /// Current value of a scalar field. Unknown names yield `Value::Null`.
    fn get(&self, field: &str) -> Value;

    /// Assign a scalar field. A `Null` for a non-nullable field resets it to
    /// its zero value; unknown names are ignored.
    fn set(&mut self, field: &str, value: Value);

    /// Entity-level validation rules, run before a save.
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    fn type_name() -> String {
        Self::model().type_name
    }
}

/// Population of a navigation field with related entities.
pub trait Navigate<T> {
    /// `related` holds every match for a collection navigation and at most
    /// one entity for a reference navigation.
    fn attach(&mut self, navigation: &str, related: Vec<T>);
}

/// An entity read from the store together with the row it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub entity: T,
    pub row: RowHandle,
}

impl<T> Loaded<T> {
    pub fn new(entity: T, row: RowHandle) -> Self {
        Loaded { entity, row }
    }

    pub fn into_inner(self) -> T {
        self.entity
    }
}

impl<T> std::ops::Deref for Loaded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T> std::ops::DerefMut for Loaded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entity
    }
}
