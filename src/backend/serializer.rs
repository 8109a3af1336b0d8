//! Cross-process transfer strategies
//!
//! Values whose type has no registered strategy still travel as generic
//! bytes, but each such type logs one warning. Registering the type with
//! [`SerializationStrategy::Generic`] silences it.

use crate::{Error, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// How values of one type are encoded for transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationStrategy {
    /// Generic byte encoding (JSON)
    Generic,
    /// Refuse to transfer values of this type
    Forbid,
}

/// Concurrent type-name to strategy table
#[derive(Debug, Default)]
pub struct SerializerRegistry {
    strategies: DashMap<String, SerializationStrategy>,
    warned: DashMap<String, ()>,
}

impl SerializerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the strategy for `type_name`
    pub fn register(&self, type_name: &str, strategy: SerializationStrategy) {
        self.strategies.insert(type_name.to_string(), strategy);
    }

    /// Strategy registered for `type_name`
    #[must_use]
    pub fn strategy_for(&self, type_name: &str) -> Option<SerializationStrategy> {
        self.strategies.get(type_name).map(|entry| *entry.value())
    }

    /// Number of unregistered types that hit the fallback path
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.warned.len()
    }

    /// Encode `value` for transfer to another worker
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if the type is forbidden, or
    /// [`Error::Json`] if the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(&self, type_name: &str, value: &T) -> Result<Vec<u8>> {
        match self.strategy_for(type_name) {
            Some(SerializationStrategy::Forbid) => Err(Error::Serialization(format!(
                "values of type {type_name} cannot be transferred between workers"
            ))),
            Some(SerializationStrategy::Generic) => Ok(serde_json::to_vec(value)?),
            None => {
                if self.warned.insert(type_name.to_string(), ()).is_none() {
                    tracing::warn!(type_name, "no serializer registered; using generic encoding");
                }
                Ok(serde_json::to_vec(value)?)
            }
        }
    }

    /// Decode bytes produced by [`encode`](Self::encode)
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the bytes are not a valid `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Ship `value` across a worker boundary: encode, then decode a fresh copy
    ///
    /// # Errors
    /// Same as [`encode`](Self::encode) and [`decode`](Self::decode).
    pub fn transfer<T: Serialize + DeserializeOwned>(&self, type_name: &str, value: &T) -> Result<T> {
        let bytes = self.encode(type_name, value)?;
        self.decode(&bytes)
    }
}
