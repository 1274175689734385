use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value as exchanged with the database driver and the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                // i64::MAX as f64 rounds up to 2^63, which is out of range.
                if f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            // Drivers that hand back every column as text still produce usable ids.
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Lower-cases text values; every other variant is returned unchanged.
    pub fn fold_case(self) -> Self {
        match self {
            Self::Text(s) => Self::Text(s.to_lowercase()),
            other => other,
        }
    }

    /// Canonical text used for identity-map slots and cache keys.
    pub fn key_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Boolean(b) => if *b { "1".into() } else { "0".into() },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            // Equal only when the float holds exactly this integer.
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                Self::Float(*f).as_i64() == Some(*i)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::from(s.as_str()),
            Value::Boolean(b) => serde_json::Value::from(*b),
        }
    }
}

/// A raw SQL fragment inlined verbatim into generated statements (`NOW()`, `hits+1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlExpr(String);

impl SqlExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_case_only_touches_text() {
        assert_eq!(Value::from("A@X.com").fold_case(), Value::from("a@x.com"));
        assert_eq!(Value::Integer(7).fold_case(), Value::Integer(7));
    }

    #[test]
    fn key_text_is_stable_for_ids() {
        assert_eq!(Value::Integer(42).key_text(), "42");
        assert_eq!(Value::from("bob").key_text(), "bob");
        assert_eq!(Value::Boolean(true).key_text(), "1");
    }

    #[test]
    fn text_ids_parse_as_integers() {
        assert_eq!(Value::from(" 12 ").as_i64(), Some(12));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn numeric_equality_coerces() {
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(3), Value::from("3"));
        assert_ne!(Value::Null, Value::from(""));
    }

    #[test]
    fn equality_is_exact() {
        assert_ne!(Value::Float(0.0), Value::Float(1e-17));
        assert_ne!(Value::Integer(0), Value::Float(1e-17));
        assert_ne!(Value::Integer((1 << 53) + 1), Value::Float((1u64 << 53) as f64));
        assert_ne!(Value::Integer(i64::MAX), Value::Float(i64::MAX as f64));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }
}
