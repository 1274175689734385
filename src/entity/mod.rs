//! Row-backed entities with dirty tracking and deferred field loading.
//!
//! An [`Entity`] is a cheap handle; clones share one underlying instance. The
//! table's identity map holds weak references to that instance, so the first
//! live entity for a key is handed to every later lookup until the last
//! handle is dropped.
//!
//! All state changes of one entity go through a single mutex. `save()` holds
//! it from capturing the modified set until the write and the cache refresh
//! have finished, so a concurrent `set()` lands either before the write (and
//! is included) or after it (and stays pending).

pub mod guard;
pub mod hooks;
pub mod snapshot;

pub use guard::AutoSaveGuard;
pub use hooks::{EntityHooks, NoHooks, Record};
pub use snapshot::EntitySnapshot;

use crate::core::{Params, Result, Row, SqlExpr, Value};
use crate::schema::sql::{self, Assignment, Projection};
use crate::schema::{FieldDescriptor, ID_FIELD, TableDescriptor};
use snapshot::encode_redirect;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{Level, event};

#[derive(Debug, Default)]
pub(crate) struct EntityState {
    id: Option<i64>,
    values: Record,
    loaded: BTreeSet<String>,
    modified: BTreeSet<String>,
}

impl EntityState {
    fn value(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or_default()
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
        self.values.insert(ID_FIELD.to_string(), Value::Integer(id));
        self.loaded.insert(ID_FIELD.to_string());
    }

    fn unload(&mut self, name: &str) {
        self.values.remove(name);
        self.loaded.remove(name);
    }
}

pub struct EntityCell {
    table: Arc<TableDescriptor>,
    state: Mutex<EntityState>,
}

#[derive(Clone)]
pub struct Entity {
    cell: Arc<EntityCell>,
}

impl Entity {
    pub(crate) fn blank(table: &Arc<TableDescriptor>) -> Self {
        Self::with_state(table, EntityState::default())
    }

    pub(crate) fn from_cell(cell: Arc<EntityCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Arc<EntityCell> {
        &self.cell
    }

    fn with_state(table: &Arc<TableDescriptor>, state: EntityState) -> Self {
        Self {
            cell: Arc::new(EntityCell {
                table: Arc::clone(table),
                state: Mutex::new(state),
            }),
        }
    }

    /// Materializes a row, reusing the live instance if its id is already mapped.
    ///
    /// An existing instance keeps its in-memory values; the row is not merged.
    pub fn load(table: &Arc<TableDescriptor>, row: Row) -> Result<Entity> {
        let id = row.get(ID_FIELD).and_then(Value::as_i64);
        if let Some(id) = id
            && let Some(existing) = table.lookup_by_id(id)?
        {
            existing.publish()?;
            return Ok(existing);
        }

        let mut state = EntityState::default();
        for (column, value) in row {
            if table.field(&column).is_some() {
                state.loaded.insert(column.clone());
                state.values.insert(column, value);
            }
        }
        if let Some(id) = id {
            state.assign_id(id);
        }

        let entity = Self::with_state(table, state);
        if let Some(winner) = entity.claim_identity()? {
            winner.publish()?;
            return Ok(winner);
        }
        entity.publish()?;
        Ok(entity)
    }

    /// Rebuilds an entity from a cache snapshot and maps it in every identity map.
    pub fn restore(table: &Arc<TableDescriptor>, snapshot: EntitySnapshot) -> Result<Entity> {
        if let Some(id) = snapshot.id
            && let Some(existing) = table.lookup_by_id(id)?
        {
            return Ok(existing);
        }

        let mut state = EntityState::default();
        for (name, value) in snapshot.values {
            if snapshot.loaded.contains(&name) && table.field(&name).is_some() {
                state.loaded.insert(name.clone());
                state.values.insert(name, value);
            }
        }
        if let Some(id) = snapshot.id {
            state.assign_id(id);
        }

        let entity = Self::with_state(table, state);
        Ok(entity.claim_identity()?.unwrap_or(entity))
    }

    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.cell.table
    }

    /// Current id without saving.
    pub fn id(&self) -> Option<i64> {
        self.peek().id
    }

    /// Saves pending changes first, so a dirty new entity gets its id.
    pub fn get_id(&self) -> Result<Option<i64>> {
        self.save()?;
        Ok(self.id())
    }

    pub fn is_new(&self) -> bool {
        self.peek().id.is_none()
    }

    pub fn is_modified(&self) -> bool {
        !self.peek().modified.is_empty()
    }

    pub fn modified_fields(&self) -> BTreeSet<String> {
        self.peek().modified.clone()
    }

    pub fn loaded_fields(&self) -> BTreeSet<String> {
        self.peek().loaded.clone()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.peek().loaded.contains(name)
    }

    /// True when both handles point at the same live instance.
    pub fn same_instance(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn guard(&self) -> AutoSaveGuard {
        AutoSaveGuard::new(self.clone())
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let table = self.table();
        let field = table.require_field(name)?;
        let mut state = self.lock()?;
        if state.id.is_some() && !state.loaded.contains(name) {
            self.fetch_field(&mut state, field)?;
            self.publish_locked(&state)?;
        }
        Ok(state.value(name))
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let table = self.table();
        let field = table.require_field(name)?;
        if field.is_read_only() {
            return Err(table.reporter().read_only(table.name(), name));
        }
        let next = field.normalize(value.into());

        let mut state = self.lock()?;
        if state.id.is_some() && !state.loaded.contains(name) {
            self.fetch_field(&mut state, field)?;
        }
        let current = state.value(name);
        if current == next {
            return Ok(());
        }

        table.hooks().before_set(name, &current, &next)?;
        if field.is_unique() && !current.is_null() {
            self.evict_key(field, &current)?;
        }
        state.values.insert(name.to_string(), next);
        state.loaded.insert(name.to_string());
        state.modified.insert(name.to_string());
        table.hooks().after_set(name, &state.values);
        Ok(())
    }

    /// Writes pending changes with one INSERT or UPDATE. No-op when clean.
    pub fn save(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.save_locked(&mut state)
    }

    fn save_locked(&self, state: &mut EntityState) -> Result<()> {
        if state.modified.is_empty() {
            return Ok(());
        }
        let table = self.table();
        table.hooks().before_save(state.id, &state.values)?;

        let inserting = state.id.is_none();
        let mut assignments = Vec::new();
        let mut bound = Params::new();
        let mut defaulted = Vec::new();
        for field in table.fields().filter(|f| f.name() != ID_FIELD) {
            let name = field.name();
            if state.modified.contains(name) {
                assignments.push(Assignment::param(table.quote(name), name));
                bound.insert(name.to_string(), state.value(name));
                continue;
            }
            let default = if inserting {
                field.create_default()
            } else {
                field.update_default()
            };
            if let Some(expr) = default {
                assignments.push(Assignment::raw(table.quote(name), expr.clone()));
                defaulted.push(name);
            }
        }

        let statement = match state.id {
            None => sql::insert(&table.quoted_table(), &assignments),
            Some(id) => {
                bound.insert(ID_FIELD.to_string(), Value::Integer(id));
                sql::update(&table.quoted_table(), &assignments, &table.quote(ID_FIELD), ID_FIELD)
            }
        };

        // Cleared before the outcome is known: a failed write is not retried.
        let pending = std::mem::take(&mut state.modified);
        event!(Level::TRACE, sql = %statement, "saving entity");

        let db = table.db();
        let outcome = db.execute(&statement, &bound).and_then(|affected| {
            if inserting {
                db.last_insert_id().map(|id| (affected, Some(id)))
            } else {
                Ok((affected, None))
            }
        });
        let (affected, new_id) = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                // Dropped values are re-read from the database on the next access.
                for name in &pending {
                    state.unload(name);
                }
                return Err(table.reporter().persist(
                    format!(
                        "Failed to {} '{}' entity",
                        if inserting { "insert" } else { "update" },
                        table.name()
                    ),
                    Some(err),
                    table.context().with_entity(state.id).with_statement(&statement),
                ));
            }
        };

        for name in defaulted {
            state.unload(name);
        }
        match (new_id, state.id) {
            (Some(id), _) => {
                state.assign_id(id);
                table.hooks().after_create(id, &state.values);
            }
            (None, Some(id)) if affected > 0 => table.hooks().after_update(id, &state.values),
            _ => {}
        }
        event!(Level::DEBUG, table = %table.name(), id = ?state.id, affected, "entity saved");

        self.publish_locked(state)
    }

    /// Fetches every field not yet loaded in a single query.
    pub fn load_deferred(&self) -> Result<()> {
        let table = self.table();
        let mut state = self.lock()?;
        let Some(id) = state.id else {
            return Ok(());
        };
        let missing: Vec<&FieldDescriptor> = table
            .fields()
            .filter(|f| !state.loaded.contains(f.name()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let projection = Projection::Columns(missing.iter().map(|f| table.quote(f.name())).collect());
        let statement = sql::select_where(&table.quoted_table(), &projection, &table.quote(ID_FIELD), ID_FIELD);
        let bound = crate::core::params([(ID_FIELD, id)]);
        let row = match table.db().fetch_row(&statement, &bound) {
            Ok(Some(row)) => row,
            Ok(None) => {
                return Err(table.reporter().query(
                    format!("No '{}' row with id {}", table.name(), id),
                    None,
                    table.context().with_entity(Some(id)).with_statement(&statement),
                ));
            }
            Err(err) => {
                return Err(table.reporter().query(
                    format!("Failed to load deferred fields of '{}'", table.name()),
                    Some(err),
                    table.context().with_entity(Some(id)).with_statement(&statement),
                ));
            }
        };

        for field in missing {
            let value = row.get(field.name()).cloned().unwrap_or_default();
            state.values.insert(field.name().to_string(), value);
            state.loaded.insert(field.name().to_string());
        }
        self.publish_locked(&state)
    }

    /// Saves pending changes, then writes one column directly and marks it unloaded.
    ///
    /// With `raw` the value must be text and is inlined as a SQL fragment.
    pub fn force_write(&self, name: &str, value: impl Into<Value>, raw: bool) -> Result<()> {
        let table = self.table();
        let field = table.require_field(name)?;
        if name == ID_FIELD {
            return Err(table.reporter().schema(
                "The id column cannot be force-written",
                table.context().with_field(name),
            ));
        }
        let value = value.into();

        let mut state = self.lock()?;
        self.save_locked(&mut state)?;
        let Some(id) = state.id else {
            return Err(table.reporter().persist(
                format!("Cannot force-write '{}' on an unsaved '{}' entity", name, table.name()),
                None,
                table.context().with_field(name),
            ));
        };

        let mut bound = crate::core::params([(ID_FIELD, id)]);
        let assignment = if raw {
            let Some(expr) = value.as_str() else {
                return Err(table.reporter().schema(
                    format!("Raw write to '{}' expects a SQL fragment, got {}", name, value.type_name()),
                    table.context().with_entity(Some(id)).with_field(name),
                ));
            };
            Assignment::raw(table.quote(name), SqlExpr::new(expr))
        } else {
            bound.insert(name.to_string(), field.normalize(value));
            Assignment::param(table.quote(name), name)
        };
        let statement = sql::update(&table.quoted_table(), &[assignment], &table.quote(ID_FIELD), ID_FIELD);

        if let Err(err) = table.db().execute(&statement, &bound) {
            return Err(table.reporter().persist(
                format!("Failed to write '{}' of '{}' entity", name, table.name()),
                Some(err),
                table.context().with_entity(Some(id)).with_statement(&statement),
            ));
        }

        if field.is_unique() && state.loaded.contains(name) {
            let old = state.value(name);
            if !old.is_null() {
                self.evict_key(field, &old)?;
            }
        }
        state.unload(name);
        self.publish_locked(&state)
    }

    /// Forgets every loaded value except the id, so reads go back to the database.
    ///
    /// Pending changes are discarded and the cached snapshot is dropped.
    pub fn refresh(&self) -> Result<()> {
        let table = self.table();
        let mut state = self.lock()?;
        state.modified.clear();
        state.values.retain(|name, _| name == ID_FIELD);
        state.loaded.retain(|name| name == ID_FIELD);
        if let (Some(cache), Some(id)) = (table.cache(), state.id) {
            cache.remove(&table.cache_key(ID_FIELD, &Value::Integer(id))?);
        }
        Ok(())
    }

    /// Loaded, cache-eligible fields plus the id. Unsaved changes are left out.
    pub fn snapshot(&self) -> EntitySnapshot {
        self.snapshot_of(&self.peek())
    }

    fn snapshot_of(&self, state: &EntityState) -> EntitySnapshot {
        let table = self.table();
        let values: Record = state
            .values
            .iter()
            .filter(|(name, _)| {
                state.loaded.contains(*name)
                    && !state.modified.contains(*name)
                    && table.field(name).is_some_and(|f| f.is_cached())
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        EntitySnapshot {
            id: state.id,
            loaded: values.keys().cloned().collect(),
            values,
        }
    }

    fn fetch_field(&self, state: &mut EntityState, field: &FieldDescriptor) -> Result<()> {
        let Some(id) = state.id else {
            return Ok(());
        };
        let table = self.table();
        let projection = Projection::Columns(vec![table.quote(field.name())]);
        let statement = sql::select_where(&table.quoted_table(), &projection, &table.quote(ID_FIELD), ID_FIELD);
        event!(Level::TRACE, sql = %statement, "fetching deferred field");

        let value = table
            .db()
            .fetch_one(&statement, &crate::core::params([(ID_FIELD, id)]))
            .map_err(|err| {
                table.reporter().query(
                    format!("Failed to load '{}' of '{}' entity", field.name(), table.name()),
                    Some(err),
                    table
                        .context()
                        .with_entity(Some(id))
                        .with_field(field.name())
                        .with_statement(&statement),
                )
            })?;
        state.values.insert(field.name().to_string(), value);
        state.loaded.insert(field.name().to_string());
        Ok(())
    }

    /// Drops the identity-map slot and cache entry of a unique value being replaced.
    fn evict_key(&self, field: &FieldDescriptor, old: &Value) -> Result<()> {
        let table = self.table();
        let old = field.normalize(old.clone());
        table.identity.release(field.name(), &old.key_text(), &self.cell)?;
        if field.is_cached()
            && let Some(cache) = table.cache()
        {
            cache.remove(&field.cache_key(&old));
        }
        Ok(())
    }

    /// Takes the id slot, or returns the live instance that already holds it.
    fn claim_identity(&self) -> Result<Option<Entity>> {
        let Some(id) = self.peek().id else {
            return Ok(None);
        };
        let winner = self
            .table()
            .identity
            .install(ID_FIELD, &id.to_string(), &self.cell)?;
        if Arc::ptr_eq(&winner, &self.cell) {
            let state = self.lock()?;
            self.install_unique_keys(&state)?;
            Ok(None)
        } else {
            Ok(Some(Entity::from_cell(winner)))
        }
    }

    fn publish(&self) -> Result<()> {
        let state = self.lock()?;
        self.publish_locked(&state)
    }

    /// Re-registers every committed unique key and rewrites the cache entries.
    ///
    /// Unsaved entities are skipped, as are values still waiting for `save()`.
    fn publish_locked(&self, state: &EntityState) -> Result<()> {
        let Some(id) = state.id else {
            return Ok(());
        };
        self.install_unique_keys(state)?;

        let table = self.table();
        let Some(cache) = table.cache() else {
            return Ok(());
        };
        for field in table.fields().filter(|f| f.is_unique() && f.is_cached()) {
            if field.name() == ID_FIELD {
                let key = field.cache_key(&Value::Integer(id));
                cache.put(&key, self.snapshot_of(state).to_bytes()?);
                continue;
            }
            if !state.loaded.contains(field.name()) || state.modified.contains(field.name()) {
                continue;
            }
            let value = field.normalize(state.value(field.name()));
            if !value.is_null() {
                cache.put(&field.cache_key(&value), encode_redirect(id)?);
            }
        }
        Ok(())
    }

    fn install_unique_keys(&self, state: &EntityState) -> Result<()> {
        let table = self.table();
        for field in table.fields().filter(|f| f.is_unique()) {
            if !state.loaded.contains(field.name()) || state.modified.contains(field.name()) {
                continue;
            }
            let value = field.normalize(state.value(field.name()));
            if !value.is_null() {
                table.identity.install(field.name(), &value.key_text(), &self.cell)?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, EntityState>> {
        Ok(self.cell.state.lock()?)
    }

    /// State for read-only accessors; a poisoned lock still yields the last state.
    fn peek(&self) -> MutexGuard<'_, EntityState> {
        self.cell
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.peek();
        f.debug_struct("Entity")
            .field("table", &self.table().name())
            .field("id", &state.id)
            .field("values", &state.values)
            .field("modified", &state.modified)
            .finish()
    }
}
