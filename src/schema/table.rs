use super::field::{FieldDecl, FieldDescriptor};
use super::identity::IdentityMap;
use super::sql::{self, Limit, Projection, SortDirection};
use crate::config::MapperConfig;
use crate::core::{ErrorContext, Result, Value, params};
use crate::driver::{CacheHandle, DatabaseHandle};
use crate::entity::snapshot::decode_redirect;
use crate::entity::{Entity, EntityCell, EntityHooks, EntitySnapshot, NoHooks};
use crate::report::{ErrorReporter, Logger, TracingLogger};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event};

/// Name of the primary key column every mapped table carries.
pub const ID_FIELD: &str = "id";

/// Static table metadata implemented once per entity type.
pub trait EntityModel {
    /// `None` marks a type without table metadata; registering it fails.
    fn table_name() -> Option<&'static str>;

    fn fields() -> Vec<FieldDecl>;

    fn hooks() -> Arc<dyn EntityHooks> {
        Arc::new(NoHooks)
    }
}

/// Runtime table declaration, for types not known at compile time.
pub struct TableDecl {
    pub name: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub hooks: Arc<dyn EntityHooks>,
}

impl TableDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            fields: Vec::new(),
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn of<M: EntityModel>() -> Self {
        Self {
            name: M::table_name().map(str::to_string),
            fields: M::fields(),
            hooks: M::hooks(),
        }
    }

    pub fn field(mut self, decl: FieldDecl) -> Self {
        self.fields.push(decl);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Collects the collaborators a table descriptor needs.
pub struct TableBuilder {
    db: Arc<dyn DatabaseHandle>,
    cache: Option<Arc<dyn CacheHandle>>,
    logger: Option<Arc<dyn Logger>>,
    config: MapperConfig,
}

impl TableBuilder {
    pub fn cache(mut self, cache: Arc<dyn CacheHandle>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(mut self, config: MapperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<M: EntityModel>(self) -> Result<Arc<TableDescriptor>> {
        self.build(TableDecl::of::<M>())
    }

    pub fn build(self, decl: TableDecl) -> Result<Arc<TableDescriptor>> {
        let logger = if self.config.log_errors {
            Some(self.logger.unwrap_or_else(|| Arc::new(TracingLogger) as Arc<dyn Logger>))
        } else {
            None
        };
        let reporter = ErrorReporter::new(logger);

        self.config
            .validate()
            .map_err(|e| reporter.schema(e, ErrorContext::default()))?;

        let Some(name) = decl.name else {
            return Err(reporter.schema(
                "Entity type declares no table name",
                ErrorContext::default(),
            ));
        };

        let mut fields = Vec::with_capacity(decl.fields.len() + 1);
        let mut positions = HashMap::new();
        if !decl.fields.iter().any(|f| f.name == ID_FIELD) {
            fields.push(FieldDescriptor::new(
                &name,
                FieldDecl::new(ID_FIELD).read_only().unique().cached(),
            ));
            positions.insert(ID_FIELD.to_string(), 0);
        }
        for mut field in decl.fields {
            if positions.contains_key(&field.name) {
                return Err(reporter.schema(
                    format!("Field '{}' is declared twice", field.name),
                    ErrorContext::table(&name).with_field(&field.name),
                ));
            }
            if field.name == ID_FIELD {
                field.read_only = true;
                field.unique = true;
                field.deferred = false;
            }
            positions.insert(field.name.clone(), fields.len());
            fields.push(FieldDescriptor::new(&name, field));
        }

        let identity = IdentityMap::new(
            fields
                .iter()
                .filter(|f| f.is_unique())
                .map(|f| f.name().to_string()),
        );

        event!(Level::DEBUG, table = %name, fields = fields.len(), "table registered");

        Ok(Arc::new(TableDescriptor {
            name,
            fields,
            positions,
            identity,
            db: self.db,
            cache: self.cache,
            hooks: decl.hooks,
            config: self.config,
            reporter,
        }))
    }
}

/// Shared metadata and identity maps for one entity type.
pub struct TableDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    positions: HashMap<String, usize>,
    pub(crate) identity: IdentityMap<EntityCell>,
    db: Arc<dyn DatabaseHandle>,
    cache: Option<Arc<dyn CacheHandle>>,
    hooks: Arc<dyn EntityHooks>,
    config: MapperConfig,
    reporter: ErrorReporter,
}

impl TableDescriptor {
    pub fn builder(db: Arc<dyn DatabaseHandle>) -> TableBuilder {
        TableBuilder {
            db,
            cache: None,
            logger: None,
            config: MapperConfig::default(),
        }
    }

    /// Registers `M` with a database and an optional cache, logging through `tracing`.
    pub fn register<M: EntityModel>(
        db: Arc<dyn DatabaseHandle>,
        cache: Option<Arc<dyn CacheHandle>>,
        config: MapperConfig,
    ) -> Result<Arc<Self>> {
        let mut builder = Self::builder(db).config(config);
        builder.cache = cache;
        builder.register::<M>()
    }

    /// Registers a table declared at runtime.
    pub fn from_decl(
        decl: TableDecl,
        db: Arc<dyn DatabaseHandle>,
        cache: Option<Arc<dyn CacheHandle>>,
        config: MapperConfig,
    ) -> Result<Arc<Self>> {
        let mut builder = Self::builder(db).config(config);
        builder.cache = cache;
        builder.build(decl)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.field(name).ok_or_else(|| {
            self.reporter.schema(
                format!("Unknown field '{}' on table '{}'", name, self.name),
                ErrorContext::table(&self.name).with_field(name),
            )
        })
    }

    pub fn db(&self) -> &dyn DatabaseHandle {
        self.db.as_ref()
    }

    /// The attached cache, unless caching is disabled in the config.
    pub fn cache(&self) -> Option<&dyn CacheHandle> {
        if self.config.use_cache {
            self.cache.as_deref()
        } else {
            None
        }
    }

    pub fn hooks(&self) -> &dyn EntityHooks {
        self.hooks.as_ref()
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn cache_key(&self, field: &str, value: &Value) -> Result<String> {
        let field = self.require_field(field)?;
        Ok(field.cache_key(&field.normalize(value.clone())))
    }

    pub(crate) fn context(&self) -> ErrorContext {
        ErrorContext::table(&self.name)
    }

    pub(crate) fn quoted_table(&self) -> String {
        self.db.escape_identifier(&self.name)
    }

    pub(crate) fn quote(&self, column: &str) -> String {
        self.db.escape_identifier(column)
    }

    /// Every non-deferred field, in declaration order.
    pub(crate) fn default_projection(&self) -> Projection {
        Projection::Columns(
            self.fields
                .iter()
                .filter(|f| !f.is_deferred())
                .map(|f| self.quote(f.name()))
                .collect(),
        )
    }

    /// A blank entity with no id and no loaded fields.
    pub fn create(self: &Arc<Self>) -> Entity {
        Entity::blank(self)
    }

    pub fn get_by_id(self: &Arc<Self>, id: i64, full_load: bool) -> Result<Option<Entity>> {
        self.get_by_unique_field(ID_FIELD, id, full_load)
    }

    /// Resolves an entity through the identity map, then the cache, then the database.
    pub fn get_by_unique_field(
        self: &Arc<Self>,
        field: &str,
        value: impl Into<Value>,
        full_load: bool,
    ) -> Result<Option<Entity>> {
        let descriptor = self.require_field(field)?;
        if !descriptor.is_unique() {
            return Err(self.reporter.schema(
                format!("Field '{}' of table '{}' is not a unique key", field, self.name),
                self.context().with_field(field),
            ));
        }
        let value = descriptor.normalize(value.into());
        let key = value.key_text();

        if let Some(cell) = self.identity.get(field, &key)? {
            event!(Level::TRACE, table = %self.name, field, key = %key, "identity map hit");
            return Ok(Some(Entity::from_cell(cell)));
        }

        if let Some(entity) = self.resolve_cached(descriptor, &value)? {
            return Ok(Some(entity));
        }

        let projection = if full_load {
            Projection::All
        } else {
            self.default_projection()
        };
        let sql = sql::select_where(&self.quoted_table(), &projection, &self.quote(field), field);
        let bound = params([(field, value)]);
        event!(Level::TRACE, sql = %sql, "fetching row");

        match self.db.fetch_row(&sql, &bound) {
            Ok(Some(row)) => Entity::load(self, row).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(self.reporter.query(
                format!("Failed to load '{}' by {}", self.name, field),
                Some(err),
                self.context().with_field(field).with_statement(&sql),
            )),
        }
    }

    fn resolve_cached(self: &Arc<Self>, field: &FieldDescriptor, value: &Value) -> Result<Option<Entity>> {
        let Some(cache) = self.cache() else {
            return Ok(None);
        };
        if !field.is_cached() {
            return Ok(None);
        }

        let key = field.cache_key(value);
        let Some(bytes) = cache.get(&key) else {
            event!(Level::TRACE, key = %key, "cache miss");
            return Ok(None);
        };

        if field.name() == ID_FIELD {
            return match EntitySnapshot::from_bytes(&bytes) {
                Ok(snapshot) => {
                    event!(Level::TRACE, key = %key, "cache hit");
                    Entity::restore(self, snapshot).map(Some)
                }
                Err(err) => {
                    event!(Level::DEBUG, key = %key, error = %err, "dropping unreadable snapshot");
                    cache.remove(&key);
                    Ok(None)
                }
            };
        }

        let id = match decode_redirect(&bytes) {
            Ok(id) => id,
            Err(err) => {
                event!(Level::DEBUG, key = %key, error = %err, "dropping unreadable redirect");
                cache.remove(&key);
                return Ok(None);
            }
        };
        event!(Level::TRACE, key = %key, id, "cache redirect");

        if let Some(entity) = self.lookup_by_id(id)? {
            return Ok(Some(entity));
        }
        match self.field(ID_FIELD) {
            Some(id_field) => self.resolve_cached(id_field, &Value::Integer(id)),
            None => Ok(None),
        }
    }

    /// Lists entities ordered by `sort_field`, projected to the default columns.
    pub fn get_list(
        self: &Arc<Self>,
        sort_field: &str,
        sort_dir: &str,
        offset: Option<u64>,
        rows: Option<u64>,
    ) -> Result<Vec<Entity>> {
        self.require_field(sort_field)?;
        let direction: SortDirection = sort_dir
            .parse()
            .map_err(|e: String| self.reporter.schema(e, self.context()))?;
        let limit = Limit::new(offset, rows, self.config.unbounded_rows);

        let sql = sql::select_ordered(
            &self.quoted_table(),
            &self.default_projection(),
            &self.quote(sort_field),
            direction,
            limit,
        );
        event!(Level::TRACE, sql = %sql, "fetching list");

        let rows = self.db.fetch_all(&sql, &Default::default()).map_err(|err| {
            self.reporter.query(
                format!("Failed to list '{}'", self.name),
                Some(err),
                self.context().with_statement(&sql),
            )
        })?;

        rows.into_iter().map(|row| Entity::load(self, row)).collect()
    }

    /// Installs (`Some`) or removes (`None`) the identity-map slot for `value`.
    ///
    /// Installing never replaces a different live entity already holding the slot.
    pub fn update_identity_map(&self, field: &str, value: &Value, entity: Option<&Entity>) -> Result<()> {
        let Some(descriptor) = self.field(field) else {
            return Ok(());
        };
        if !self.identity.tracks(field) {
            return Ok(());
        }
        let key = descriptor.normalize(value.clone()).key_text();
        match entity {
            Some(entity) => {
                self.identity.install(field, &key, entity.cell())?;
            }
            None => self.identity.remove(field, &key)?,
        }
        Ok(())
    }

    /// Live entity for `id`, without touching the cache or the database.
    pub fn lookup_by_id(&self, id: i64) -> Result<Option<Entity>> {
        Ok(self
            .identity
            .get(ID_FIELD, &id.to_string())?
            .map(Entity::from_cell))
    }

    /// Drops identity-map slots whose entities are gone.
    pub fn prune_identity_maps(&self) -> Result<usize> {
        self.identity.prune()
    }

    pub fn live_entities(&self) -> usize {
        self.identity.live_count(ID_FIELD)
    }
}

impl std::fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("config", &self.config)
            .finish()
    }
}
