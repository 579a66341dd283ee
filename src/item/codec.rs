//! Element codecs for store-backed items

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts a slice of elements to and from the bytes kept in a block store
pub trait Codec<T>: 'static {
    fn encode(values: &[T]) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Vec<T>>;
}

/// Bitwise copy for plain-old-data elements
#[derive(Debug, Clone, Copy, Default)]
pub struct PodCodec;

impl<T: bytemuck::Pod> Codec<T> for PodCodec {
    fn encode(values: &[T]) -> Result<Vec<u8>> {
        Ok(bytemuck::cast_slice::<T, u8>(values).to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Vec<T>> {
        let element = std::mem::size_of::<T>();
        if element == 0 {
            return Err(Error::Codec("Zero-sized elements cannot be stored".to_string()));
        }
        if bytes.len() % element != 0 {
            return Err(Error::Codec(format!(
                "Block of {} bytes is not a multiple of the {} byte element size",
                bytes.len(),
                element
            )));
        }
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(bytes))
    }
}

/// Serde (JSON) encoding for elements that own sub-resources
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for SerdeCodec {
    fn encode(values: &[T]) -> Result<Vec<u8>> {
        serde_json::to_vec(values)
            .map_err(|e| Error::Codec(format!("Failed to serialize elements: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<Vec<T>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Codec(format!("Failed to deserialize elements: {}", e)))
    }
}
