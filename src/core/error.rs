use serde_json::json;
use thiserror::Error;

/// Failure type returned by database drivers and cache backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where an error happened: the table and, when known, the offending entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub table: Option<String>,
    pub entity_id: Option<i64>,
    pub field: Option<String>,
    pub statement: Option<String>,
}

impl ErrorContext {
    pub fn table(table: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, id: Option<i64>) -> Self {
        self.entity_id = id;
        self
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_statement(mut self, sql: &str) -> Self {
        self.statement = Some(sql.to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "table": self.table,
            "entity_id": self.entity_id,
            "field": self.field,
            "statement": self.statement,
        })
    }
}

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Schema error: {message}")]
    Schema {
        message: String,
        context: ErrorContext,
    },

    #[error("Field '{field}' of table '{table}' is read-only")]
    ReadOnly { table: String, field: String },

    #[error("Query error: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<BoxError>,
        context: ErrorContext,
    },

    #[error("Persist error: {message}")]
    Persist {
        message: String,
        #[source]
        source: Option<BoxError>,
        context: ErrorContext,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl MapperError {
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Schema { context, .. }
            | Self::Query { context, .. }
            | Self::Persist { context, .. } => Some(context),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl<T> From<std::sync::PoisonError<T>> for MapperError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MapperError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MapperError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}
