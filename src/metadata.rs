use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Decoded view of an `Upload-Metadata` value.
///
/// The store keeps the raw string; this type is only built on request via
/// [`crate::File::decoded_metadata`].
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata(HashMap<String, String>);

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("metadata key not present")]
    InvalidKey,
    #[error("metadata value is not valid base64: {0}")]
    DecodeError(String),
    #[error("metadata does not follow the `key base64value,...` format")]
    InvalidMetadataFormat,
}

impl Metadata {
    pub fn new() -> Self {
        Default::default()
    }

    /// Raw bytes for `key`. Keys sent without a value decode to an empty vec.
    pub fn get_raw(&self, key: &str) -> Result<Vec<u8>, MetadataError> {
        let value = self.0.get(key).ok_or(MetadataError::InvalidKey)?;

        base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|e| MetadataError::DecodeError(e.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<String, MetadataError> {
        let raw = self.get_raw(key)?;
        String::from_utf8(raw).map_err(|e| MetadataError::DecodeError(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for Metadata {
    type Error = MetadataError;

    /// Parses a tus [`Upload-Metadata`](https://tus.io/protocols/resumable-upload.html#upload-metadata) value.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(MetadataError::InvalidMetadataFormat);
        }

        let mut metadata = Metadata::new();

        for pair in value.split(',') {
            let pair = pair.trim();

            if pair.is_empty() {
                continue;
            }

            let parts: Vec<&str> = pair.split(' ').filter(|v| !v.is_empty()).collect();

            let (key, value) = match parts.as_slice() {
                [key] => (*key, String::default()),
                [key, value] => (*key, value.to_string()),
                _ => return Err(MetadataError::InvalidMetadataFormat),
            };

            base64::engine::general_purpose::STANDARD
                .decode(&value)
                .map_err(|e| MetadataError::DecodeError(e.to_string()))?;

            metadata.0.insert(key.to_string(), value);
        }

        Ok(metadata)
    }
}
