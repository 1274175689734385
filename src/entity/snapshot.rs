use super::hooks::Record;
use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cache representation of an entity: loaded, cache-eligible fields only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: Option<i64>,
    pub values: Record,
    pub loaded: BTreeSet<String>,
}

impl EntitySnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Payload stored under non-id unique keys: the id to chase.
pub(crate) fn encode_redirect(id: i64) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(&id)?)
}

pub(crate) fn decode_redirect(bytes: &[u8]) -> Result<i64> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[test]
    fn snapshot_survives_encoding() {
        let mut values = Record::new();
        values.insert("id".into(), Value::Integer(3));
        values.insert("email".into(), Value::from("a@x.com"));
        let snapshot = EntitySnapshot {
            id: Some(3),
            loaded: values.keys().cloned().collect(),
            values,
        };

        let decoded = EntitySnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn garbage_is_a_snapshot_error() {
        let err = EntitySnapshot::from_bytes(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, crate::core::MapperError::Snapshot(_)));
        assert_eq!(decode_redirect(&encode_redirect(99).unwrap()).unwrap(), 99);
    }
}
