use crate::core::{SqlExpr, Value};

/// Static declaration of one entity attribute.
///
/// ```
/// use entitymap::FieldDecl;
///
/// let email = FieldDecl::new("email").unique().cached().case_fold();
/// let created = FieldDecl::new("created_at").read_only().on_create("NOW()");
/// # let _ = (email, created);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub read_only: bool,
    pub case_fold: bool,
    pub cached: bool,
    pub unique: bool,
    pub deferred: bool,
    pub create_default: Option<SqlExpr>,
    pub update_default: Option<SqlExpr>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
            case_fold: false,
            cached: false,
            unique: false,
            deferred: false,
            create_default: None,
            update_default: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn case_fold(mut self) -> Self {
        self.case_fold = true;
        self
    }

    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// SQL fragment written on INSERT when the field was not set explicitly.
    pub fn on_create(mut self, expr: impl Into<String>) -> Self {
        self.create_default = Some(SqlExpr::new(expr));
        self
    }

    /// SQL fragment written on UPDATE when the field was not modified.
    pub fn on_update(mut self, expr: impl Into<String>) -> Self {
        self.update_default = Some(SqlExpr::new(expr));
        self
    }
}

/// Immutable per-field metadata consulted by tables and entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    table: String,
    read_only: bool,
    case_fold: bool,
    cached: bool,
    unique: bool,
    deferred: bool,
    create_default: Option<SqlExpr>,
    update_default: Option<SqlExpr>,
    cache_prefix: String,
}

impl FieldDescriptor {
    pub fn new(table: &str, decl: FieldDecl) -> Self {
        let cache_prefix = format!("{}:{}:", table, decl.name);
        Self {
            name: decl.name,
            table: table.to_string(),
            read_only: decl.read_only,
            case_fold: decl.case_fold,
            cached: decl.cached,
            unique: decl.unique,
            deferred: decl.deferred,
            create_default: decl.create_default,
            update_default: decl.update_default,
            cache_prefix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_case_folded(&self) -> bool {
        self.case_fold
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn create_default(&self) -> Option<&SqlExpr> {
        self.create_default.as_ref()
    }

    pub fn update_default(&self) -> Option<&SqlExpr> {
        self.update_default.as_ref()
    }

    /// `"{table}:{field}:"`
    pub fn cache_prefix(&self) -> &str {
        &self.cache_prefix
    }

    pub fn cache_key(&self, value: &Value) -> String {
        format!("{}{}", self.cache_prefix, value.key_text())
    }

    /// Applies this field's case-folding rule.
    pub fn normalize(&self, value: Value) -> Value {
        if self.case_fold { value.fold_case() } else { value }
    }
}
