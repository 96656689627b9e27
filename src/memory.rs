use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::data_store::{check_write, require_id, DataStore, Offset, UploadLength};
use crate::locks::UploadLocks;
use crate::options::StoreOptions;
use crate::request::{CreateRequest, WriteRequest};
use crate::{DataStoreError, File, Result};

#[derive(Debug)]
struct Upload {
    file: File,
    upload_length: UploadLength,
    data: Vec<u8>,
}

impl Upload {
    fn offset(&self) -> Offset {
        Offset {
            size: self.data.len() as u64,
            upload_length: self.upload_length,
        }
    }
}

#[derive(Debug, Default)]
struct Uploads {
    active: HashMap<String, Upload>,
    /// Terminated ids; never handed out again by this store.
    retired: HashSet<String>,
}

impl Uploads {
    fn is_taken(&self, file_id: &str) -> bool {
        self.active.contains_key(file_id) || self.retired.contains(file_id)
    }
}

/// Keeps uploads in process memory. State does not survive a restart; use
/// [`crate::FileSystemStore`] for that.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    options: StoreOptions,
    uploads: Arc<RwLock<Uploads>>,
    locks: UploadLocks,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            uploads: Arc::new(RwLock::new(Uploads::default())),
            locks: UploadLocks::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Uploads> {
        self.uploads.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Uploads> {
        self.uploads.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bytes received so far for `file_id`.
    pub fn contents(&self, file_id: &str) -> Result<Vec<u8>> {
        self.read()
            .active
            .get(file_id)
            .map(|upload| upload.data.clone())
            .ok_or_else(|| DataStoreError::NotFound(file_id.to_string()))
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StoreOptions {
        &mut self.options
    }

    async fn create(&self, request: &CreateRequest) -> Result<File> {
        let file = self
            .options
            .reserve_file(request, |file| async move {
                let mut uploads = self.write_lock();
                if uploads.is_taken(file.id()) {
                    return Ok(None);
                }
                uploads.active.insert(
                    file.id().to_string(),
                    Upload {
                        file: file.clone(),
                        upload_length: UploadLength::of(&file),
                        data: Vec::new(),
                    },
                );
                Ok(Some(file))
            })
            .await?;

        tracing::info!(file_id = %file.id(), upload_length = ?file.upload_length(), "Upload created");
        Ok(file)
    }

    async fn write(&self, request: WriteRequest) -> Result<u64> {
        require_id(&request.file_id)?;
        let _guard = self.locks.lock(&request.file_id).await;

        let mut uploads = self.write_lock();
        let upload = uploads
            .active
            .get_mut(&request.file_id)
            .ok_or_else(|| DataStoreError::NotFound(request.file_id.clone()))?;

        upload.upload_length = check_write(&request.file_id, upload.offset(), &request)?;
        upload.data.extend_from_slice(&request.data);

        let offset = upload.offset();
        tracing::debug!(
            file_id = %request.file_id,
            offset = offset.size,
            size_bytes = request.data.len(),
            "Upload chunk written"
        );
        if offset.is_complete() {
            tracing::info!(file_id = %request.file_id, size_bytes = offset.size, "Upload complete");
        }

        Ok(offset.size)
    }

    async fn get_offset(&self, file_id: &str) -> Result<Offset> {
        require_id(file_id)?;
        self.read()
            .active
            .get(file_id)
            .map(Upload::offset)
            .ok_or_else(|| DataStoreError::NotFound(file_id.to_string()))
    }

    async fn get_file(&self, file_id: &str) -> Result<File> {
        require_id(file_id)?;
        self.read()
            .active
            .get(file_id)
            .map(|upload| upload.file.clone())
            .ok_or_else(|| DataStoreError::NotFound(file_id.to_string()))
    }

    async fn terminate(&self, file_id: &str) -> Result<()> {
        require_id(file_id)?;
        let _guard = self.locks.lock(file_id).await;

        let mut uploads = self.write_lock();
        uploads
            .active
            .remove(file_id)
            .ok_or_else(|| DataStoreError::NotFound(file_id.to_string()))?;
        uploads.retired.insert(file_id.to_string());
        drop(uploads);

        tracing::info!(file_id = %file_id, "Upload terminated");
        Ok(())
    }
}
