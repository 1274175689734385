pub mod error;
pub mod types;
pub mod value;

pub use error::{BoxError, ErrorContext, MapperError, Result};
pub use types::{Params, Row, params};
pub use value::{SqlExpr, Value};
