pub mod field;
pub mod identity;
pub mod sql;
pub mod table;

pub use field::{FieldDecl, FieldDescriptor};
pub use identity::IdentityMap;
pub use sql::{Limit, SortDirection};
pub use table::{EntityModel, ID_FIELD, TableBuilder, TableDecl, TableDescriptor};
