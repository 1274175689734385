//! Row-to-entity mapping with at most one live entity per unique key.
//!
//! A [`TableDescriptor`] is registered once per entity type. Lookups go through
//! the table's weak identity map, then the external cache, then the database:
//!
//! ```ignore
//! let users = TableDescriptor::builder(db)
//!     .cache(Arc::new(MemoryCache::default()))
//!     .register::<User>()?;
//!
//! let user = users.create();
//! user.set("email", "A@x.com")?;
//! user.save()?;
//!
//! let same = users.get_by_unique_field("email", "a@X.com", false)?.unwrap();
//! assert!(same.same_instance(&user));
//! ```

pub mod config;
pub mod core;
pub mod driver;
pub mod entity;
pub mod report;
pub mod schema;

pub use config::MapperConfig;
pub use crate::core::{BoxError, ErrorContext, MapperError, Params, Result, Row, SqlExpr, Value, params};
pub use driver::{CacheHandle, DatabaseHandle, DriverResult, MemoryCache};
pub use entity::{AutoSaveGuard, Entity, EntityHooks, EntitySnapshot, NoHooks, Record};
pub use report::{ErrorReporter, Logger, TracingLogger};
pub use schema::{
    EntityModel, FieldDecl, FieldDescriptor, ID_FIELD, Limit, SortDirection, TableBuilder,
    TableDecl, TableDescriptor,
};
