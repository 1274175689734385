use super::Value;
use std::collections::BTreeMap;

/// One result row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Named statement parameters, bound by the driver to `:name` placeholders.
pub type Params = BTreeMap<String, Value>;

/// Builds a parameter map from `(name, value)` pairs.
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
