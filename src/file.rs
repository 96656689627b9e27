use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, MetadataError};
use crate::{DataStoreError, Result};

/// Identity and declared shape of one resumable upload.
///
/// A `File` is built once by [`crate::DataStore::create`] and never changes
/// afterwards. Progress (the byte offset) and a length supplied after a
/// deferred creation live in the store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileFields")]
pub struct File {
    id: String,
    upload_length: Option<u64>,
    upload_defer_length: Option<bool>,
    upload_metadata: Option<String>,
}

/// Serialized shape of a [`File`]; deserializing goes through [`File::new`].
#[derive(Deserialize)]
struct FileFields {
    id: String,
    upload_length: Option<u64>,
    upload_defer_length: Option<bool>,
    upload_metadata: Option<String>,
}

impl TryFrom<FileFields> for File {
    type Error = DataStoreError;

    fn try_from(fields: FileFields) -> Result<Self> {
        File::new(
            fields.id,
            fields.upload_length,
            fields.upload_defer_length,
            fields.upload_metadata,
        )
    }
}

impl File {
    pub fn new(
        file_id: impl Into<String>,
        upload_length: Option<u64>,
        upload_defer_length: Option<bool>,
        upload_metadata: Option<String>,
    ) -> Result<Self> {
        let id = file_id.into();
        if id.is_empty() {
            return Err(DataStoreError::invalid(
                "[File] constructor must be given a file_id",
            ));
        }

        if upload_length.is_none() && upload_defer_length != Some(true) {
            return Err(DataStoreError::invalid(
                "[File] constructor must be given either a upload_length or upload_defer_length",
            ));
        }

        Ok(Self {
            id,
            upload_length,
            upload_defer_length,
            upload_metadata,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn upload_length(&self) -> Option<u64> {
        self.upload_length
    }

    pub fn upload_defer_length(&self) -> Option<bool> {
        self.upload_defer_length
    }

    pub fn upload_metadata(&self) -> Option<&str> {
        self.upload_metadata.as_deref()
    }

    /// True when the total length was not known at creation.
    pub fn is_deferred(&self) -> bool {
        self.upload_length.is_none()
    }

    pub fn decoded_metadata(&self) -> std::result::Result<Metadata, MetadataError> {
        match self.upload_metadata.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Metadata::try_from(raw),
            _ => Ok(Metadata::default()),
        }
    }
}
