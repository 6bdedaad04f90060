//! Record codecs.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StateError, StateResult};

/// Encodes records of type `T` into cache values and back.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> StateResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> StateResult<T>;
}

/// JSON codec, the same representation the redb tables store.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> StateResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StateError::Serialize(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> StateResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StateError::Deserialize(e.to_string()))
    }
}
