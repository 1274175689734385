/// Row limit used when only an offset is requested (`LIMIT <offset>,<max>`).
pub const UNBOUNDED_ROWS: u64 = u64::MAX;

/// Per-table mapping configuration
///
/// Built with chained setters, similar to a connection config:
///
/// ```
/// use entitymap::MapperConfig;
///
/// let config = MapperConfig::new().auto_save(true).use_cache(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// Save dirty entities when an unclosed `AutoSaveGuard` goes out of scope
    pub auto_save: bool,

    /// Consult and maintain the external cache when one is attached
    pub use_cache: bool,

    /// Forward typed errors to the logger at construction time
    pub log_errors: bool,

    /// Row count emitted for offset-only pagination
    pub unbounded_rows: u64,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self {
            auto_save: false,
            use_cache: true,
            log_errors: true,
            unbounded_rows: UNBOUNDED_ROWS,
        }
    }

    /// Enable or disable best-effort saving from dropped guards
    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Enable or disable the external cache
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Enable or disable error logging
    pub fn log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Set the row count used for offset-only pagination
    pub fn unbounded_rows(mut self, rows: u64) -> Self {
        self.unbounded_rows = rows;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.unbounded_rows == 0 {
            return Err("unbounded_rows must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::new()
    }
}
