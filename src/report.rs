//! Typed error construction with logging at the point of construction.

use crate::core::{BoxError, ErrorContext, MapperError};
use std::error::Error;
use std::sync::Arc;
use tracing::{Level, event};

/// Sink for error reports. Fire-and-forget.
pub trait Logger: Send + Sync {
    fn write(&self, message: &str, context: Option<&serde_json::Value>, cause: Option<&dyn Error>);
}

/// Forwards reports to `tracing` at ERROR level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn write(&self, message: &str, context: Option<&serde_json::Value>, cause: Option<&dyn Error>) {
        let context = context.map(|c| c.to_string()).unwrap_or_default();
        match cause {
            Some(cause) => event!(Level::ERROR, %context, cause = %cause, "{}", message),
            None => event!(Level::ERROR, %context, "{}", message),
        }
    }
}

/// Builds `MapperError`s and logs each one exactly once as it is built.
#[derive(Clone, Default)]
pub struct ErrorReporter {
    logger: Option<Arc<dyn Logger>>,
}

impl ErrorReporter {
    pub fn new(logger: Option<Arc<dyn Logger>>) -> Self {
        Self { logger }
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    pub fn schema(&self, message: impl Into<String>, context: ErrorContext) -> MapperError {
        let message = message.into();
        self.log(&message, &context, None);
        MapperError::Schema { message, context }
    }

    pub fn read_only(&self, table: &str, field: &str) -> MapperError {
        let context = ErrorContext::table(table).with_field(field);
        let err = MapperError::ReadOnly {
            table: table.to_string(),
            field: field.to_string(),
        };
        self.log(&err.to_string(), &context, None);
        err
    }

    pub fn query(
        &self,
        message: impl Into<String>,
        source: Option<BoxError>,
        context: ErrorContext,
    ) -> MapperError {
        let message = message.into();
        self.log(&message, &context, source.as_deref().map(|e| e as &dyn Error));
        MapperError::Query {
            message,
            source,
            context,
        }
    }

    pub fn persist(
        &self,
        message: impl Into<String>,
        source: Option<BoxError>,
        context: ErrorContext,
    ) -> MapperError {
        let message = message.into();
        self.log(&message, &context, source.as_deref().map(|e| e as &dyn Error));
        MapperError::Persist {
            message,
            source,
            context,
        }
    }

    fn log(&self, message: &str, context: &ErrorContext, cause: Option<&dyn Error>) {
        if let Some(logger) = &self.logger {
            logger.write(message, Some(&context.to_json()), cause);
        }
    }
}
