use crate::core::{Result, Value};
use std::collections::BTreeMap;

/// Field values of one entity, keyed by field name.
pub type Record = BTreeMap<String, Value>;

/// Lifecycle callbacks registered once per entity type.
///
/// Hooks run while the entity's state is locked, so they receive plain values
/// and must not call back into the same entity. Returning an error from
/// `before_set` or `before_save` aborts the operation without touching state.
pub trait EntityHooks: Send + Sync {
    fn before_set(&self, _field: &str, _current: &Value, _next: &Value) -> Result<()> {
        Ok(())
    }

    fn after_set(&self, _field: &str, _values: &Record) {}

    fn before_save(&self, _id: Option<i64>, _values: &Record) -> Result<()> {
        Ok(())
    }

    fn after_create(&self, _id: i64, _values: &Record) {}

    /// Fires only when the UPDATE affected at least one row.
    fn after_update(&self, _id: i64, _values: &Record) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}
