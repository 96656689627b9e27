use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::options::StoreOptions;
use crate::request::{CreateRequest, WriteRequest};
use crate::{DataStoreError, File, Result};

/// Total length of an upload as currently known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadLength {
    Known(u64),
    /// Created with `Upload-Defer-Length` and not resolved by a write yet.
    Deferred,
}

impl UploadLength {
    pub fn of(file: &File) -> Self {
        match file.upload_length() {
            Some(length) => Self::Known(length),
            None => Self::Deferred,
        }
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(length) => Some(*length),
            Self::Deferred => None,
        }
    }
}

/// Progress of an upload, as returned by [`DataStore::get_offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub size: u64,
    pub upload_length: UploadLength,
}

impl Offset {
    pub fn is_complete(&self) -> bool {
        self.upload_length.known() == Some(self.size)
    }
}

/// Storage contract behind the tus creation, PATCH and HEAD requests.
///
/// Implementations must serialize writes per upload id, keep the recorded
/// offset from ever getting ahead of persisted bytes, and report every
/// failure through the returned `Result`.
#[async_trait]
pub trait DataStore: Send + Sync {
    fn options(&self) -> &StoreOptions;

    fn options_mut(&mut self) -> &mut StoreOptions;

    fn path(&self) -> &str {
        self.options().path()
    }

    fn extensions(&self) -> Option<&[String]> {
        self.options().extensions()
    }

    fn set_extensions(&mut self, extensions: Vec<String>) {
        self.options_mut().set_extensions(extensions);
    }

    /// Reserves a new upload with zero bytes received.
    async fn create(&self, request: &CreateRequest) -> Result<File>;

    /// Appends `request.data` at `request.offset` and returns the new offset.
    async fn write(&self, request: WriteRequest) -> Result<u64>;

    async fn get_offset(&self, file_id: &str) -> Result<Offset>;

    async fn get_file(&self, file_id: &str) -> Result<File>;

    /// Removes the upload's bytes and state.
    async fn terminate(&self, file_id: &str) -> Result<()>;

    async fn exists(&self, file_id: &str) -> Result<bool> {
        match self.get_file(file_id).await {
            Ok(_) => Ok(true),
            Err(DataStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Checks a write against the recorded offset and length and returns the
/// length to record once the payload is persisted.
pub(crate) fn check_write(
    file_id: &str,
    recorded: Offset,
    request: &WriteRequest,
) -> Result<UploadLength> {
    if request.offset != recorded.size {
        tracing::warn!(
            file_id = %file_id,
            expected = recorded.size,
            actual = request.offset,
            "Rejected write with stale offset"
        );
        return Err(DataStoreError::OffsetMismatch {
            expected: recorded.size,
            actual: request.offset,
        });
    }

    let end = recorded
        .size
        .checked_add(request.data.len() as u64)
        .ok_or_else(|| DataStoreError::invalid("upload offset overflow"))?;

    let length = match (recorded.upload_length, request.upload_length) {
        (UploadLength::Known(known), Some(declared)) if known != declared => {
            return Err(DataStoreError::invalid(format!(
                "upload length is already {}, cannot change it to {}",
                known, declared
            )));
        }
        (UploadLength::Known(known), _) => UploadLength::Known(known),
        (UploadLength::Deferred, Some(declared)) => UploadLength::Known(declared),
        (UploadLength::Deferred, None) => UploadLength::Deferred,
    };

    if let UploadLength::Known(total) = length {
        if end > total {
            return Err(DataStoreError::invalid(format!(
                "write would end at {} bytes, past the upload length of {}",
                end, total
            )));
        }
    }

    Ok(length)
}

pub(crate) fn require_id(file_id: &str) -> Result<()> {
    if file_id.is_empty() {
        return Err(DataStoreError::NotFound(String::new()));
    }
    Ok(())
}
