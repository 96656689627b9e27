use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::record::{UploadRecord, INFO_FILE};
use crate::data_store::{check_write, require_id, DataStore, Offset};
use crate::locks::UploadLocks;
use crate::options::StoreOptions;
use crate::request::{CreateRequest, WriteRequest};
use crate::{DataStoreError, File, Result};

const DATA_FILE: &str = "file";
const TERMINATED_FILE: &str = "terminated";

/// Stores every upload in its own directory under the configured path:
///
/// ```text
/// <path>/<id>/file       received bytes
/// <path>/<id>/info.json  File, durable offset and resolved length
/// ```
///
/// The offset in `info.json` is only advanced after the bytes are flushed,
/// so a crash mid-write leaves at most some unacknowledged tail bytes in
/// `file`; the next write truncates them.
///
/// Terminating an upload removes both files but keeps the directory with a
/// `terminated` marker, so the id is never reserved again.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    options: StoreOptions,
    root_path: PathBuf,
    locks: UploadLocks,
}

fn is_safe_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id != "."
        && file_id != ".."
        && !file_id.contains(|c: char| c == '/' || c == '\\' || c == '\0')
}

impl FileSystemStore {
    pub async fn new(options: StoreOptions) -> Result<Self> {
        let root_path = PathBuf::from(options.path());

        fs::create_dir_all(&root_path).await.map_err(|e| {
            tracing::warn!(path = %root_path.display(), error = %e, "Failed to create upload directory");
            DataStoreError::Io(e)
        })?;

        Ok(Self {
            options,
            root_path,
            locks: UploadLocks::new(),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Directory of an existing-or-future upload. Ids that could escape the
    /// root can never exist, so they read as not found.
    fn upload_dir(&self, file_id: &str) -> Result<PathBuf> {
        require_id(file_id)?;
        if !is_safe_id(file_id) {
            return Err(DataStoreError::NotFound(file_id.to_string()));
        }
        Ok(self.root_path.join(file_id))
    }

    /// Path of the received bytes for `file_id`.
    pub fn data_path(&self, file_id: &str) -> Result<PathBuf> {
        Ok(self.upload_dir(file_id)?.join(DATA_FILE))
    }

    async fn try_reserve(&self, file: File) -> Result<Option<File>> {
        if !is_safe_id(file.id()) {
            return Err(DataStoreError::invalid(format!(
                "upload id `{}` is not usable as a directory name",
                file.id()
            )));
        }

        let upload_dir = self.root_path.join(file.id());
        match fs::create_dir(&upload_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = Self::initialize(&upload_dir, &file).await {
            // Release the id again; the upload was never handed out.
            let _ = fs::remove_dir_all(&upload_dir).await;
            return Err(e);
        }

        Ok(Some(file))
    }

    async fn initialize(upload_dir: &Path, file: &File) -> Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(upload_dir.join(DATA_FILE))
            .await?;

        UploadRecord::new(file.clone()).store(upload_dir).await
    }
}

#[async_trait]
impl DataStore for FileSystemStore {
    fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StoreOptions {
        &mut self.options
    }

    async fn create(&self, request: &CreateRequest) -> Result<File> {
        let file = self
            .options
            .reserve_file(request, |file| self.try_reserve(file))
            .await?;

        tracing::info!(
            file_id = %file.id(),
            upload_length = ?file.upload_length(),
            path = %self.root_path.join(file.id()).display(),
            "Upload created"
        );
        Ok(file)
    }

    async fn write(&self, request: WriteRequest) -> Result<u64> {
        let upload_dir = self.upload_dir(&request.file_id)?;
        let _guard = self.locks.lock(&request.file_id).await;

        let mut record = UploadRecord::load(&upload_dir, &request.file_id).await?;
        let upload_length = check_write(&request.file_id, record.offset(), &request)?;

        let mut data_file = fs::OpenOptions::new()
            .write(true)
            .open(upload_dir.join(DATA_FILE))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DataStoreError::NotFound(request.file_id.clone()),
                _ => DataStoreError::Io(e),
            })?;

        // Anything past the recorded offset was never acknowledged.
        data_file.set_len(record.offset).await?;
        data_file.seek(SeekFrom::Start(record.offset)).await?;
        data_file.write_all(&request.data).await?;
        data_file.sync_data().await?;
        drop(data_file);

        record.offset += request.data.len() as u64;
        record.upload_length = upload_length;
        record.store(&upload_dir).await?;

        let offset = record.offset();
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
        let upload_dir = self.upload_dir(file_id)?;
        let record = UploadRecord::load(&upload_dir, file_id).await?;
        Ok(record.offset())
    }

    async fn get_file(&self, file_id: &str) -> Result<File> {
        let upload_dir = self.upload_dir(file_id)?;
        Ok(UploadRecord::load(&upload_dir, file_id).await?.file)
    }

    async fn terminate(&self, file_id: &str) -> Result<()> {
        let upload_dir = self.upload_dir(file_id)?;
        let _guard = self.locks.lock(file_id).await;

        // The record goes first: from here on the upload reads as not found.
        match fs::remove_file(upload_dir.join(INFO_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DataStoreError::NotFound(file_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        fs::write(upload_dir.join(TERMINATED_FILE), b"").await?;
        match fs::remove_file(upload_dir.join(DATA_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(file_id = %file_id, "Upload terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_store::UploadLength;
    use base64::Engine as _;
    use futures::future::join_all;
    use std::collections::HashSet;

    async fn store_in(dir: &Path) -> FileSystemStore {
        let options = StoreOptions::new(dir.join("uploads").to_string_lossy()).unwrap();
        FileSystemStore::new(options).await.unwrap()
    }

    #[tokio::test]
    async fn test_local_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let metadata = base64::engine::general_purpose::STANDARD.encode("test_local_file.mov");
        let request = CreateRequest::with_length(16361047).with_metadata(format!("filename {}", metadata));

        let file = store.create(&request).await.unwrap();
        assert_eq!(file.upload_length(), Some(16361047));
        assert_eq!(
            file.decoded_metadata().unwrap().get_str("filename").unwrap(),
            "test_local_file.mov"
        );

        let upload_dir = store.root_path().join(file.id());
        assert!(upload_dir.join("file").exists());
        assert!(upload_dir.join("info.json").exists());
        assert_eq!(store.get_offset(file.id()).await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn writes_land_in_the_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let file = store.create(&CreateRequest::with_length(10)).await.unwrap();

        assert_eq!(store.write(WriteRequest::new(file.id(), 0, &b"abcd"[..])).await.unwrap(), 4);
        assert_eq!(
            store.write(WriteRequest::new(file.id(), 4, &b"efghij"[..])).await.unwrap(),
            10
        );

        let contents = fs::read(store.data_path(file.id()).unwrap()).await.unwrap();
        assert_eq!(contents, b"abcdefghij");
        assert!(store.get_offset(file.id()).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn offsets_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let file = {
            let store = store_in(dir.path()).await;
            let file = store.create(&CreateRequest::deferred()).await.unwrap();
            store.write(WriteRequest::new(file.id(), 0, &b"abc"[..])).await.unwrap();
            file
        };

        let reopened = store_in(dir.path()).await;
        let offset = reopened.get_offset(file.id()).await.unwrap();
        assert_eq!(offset, Offset { size: 3, upload_length: UploadLength::Deferred });
        assert_eq!(reopened.get_file(file.id()).await.unwrap(), file);
    }

    #[tokio::test]
    async fn unacknowledged_tail_bytes_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let file = store.create(&CreateRequest::with_length(8)).await.unwrap();
        store.write(WriteRequest::new(file.id(), 0, &b"abcd"[..])).await.unwrap();

        // Bytes persisted by a write that crashed before recording its offset.
        let data_path = store.data_path(file.id()).unwrap();
        let mut data_file = fs::OpenOptions::new().append(true).open(&data_path).await.unwrap();
        data_file.write_all(b"zz").await.unwrap();
        drop(data_file);

        assert_eq!(store.get_offset(file.id()).await.unwrap().size, 4);
        store.write(WriteRequest::new(file.id(), 4, &b"efgh"[..])).await.unwrap();
        assert_eq!(fs::read(&data_path).await.unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn mismatched_offset_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let file = store.create(&CreateRequest::with_length(10)).await.unwrap();
        store.write(WriteRequest::new(file.id(), 0, &b"abcd"[..])).await.unwrap();

        let err = store
            .write(WriteRequest::new(file.id(), 0, &b"abcd"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::OffsetMismatch { expected: 4, actual: 0 }));
        assert_eq!(store.get_offset(file.id()).await.unwrap().size, 4);
        assert_eq!(fs::read(store.data_path(file.id()).unwrap()).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn unknown_and_unsafe_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        for id in ["", "missing", "..", "../etc"] {
            let err = store.get_offset(id).await.unwrap_err();
            assert_eq!(err.code(), "ENOENT");
        }
        assert!(matches!(
            store.write(WriteRequest::new("missing", 0, &b"a"[..])).await,
            Err(DataStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unsafe_generated_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::new(dir.path().to_string_lossy())
            .unwrap()
            .with_naming_function(|_| "../escape".to_string());
        let store = FileSystemStore::new(options).await.unwrap();

        let err = store.create(&CreateRequest::with_length(1)).await.unwrap_err();
        assert!(matches!(err, DataStoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn colliding_names_exhaust_the_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::new(dir.path().to_string_lossy())
            .unwrap()
            .with_naming_function(|_| "fixed".to_string())
            .with_id_retry_budget(2)
            .unwrap();
        let store = FileSystemStore::new(options).await.unwrap();

        store.create(&CreateRequest::with_length(1)).await.unwrap();
        let err = store.create(&CreateRequest::with_length(1)).await.unwrap_err();
        assert!(matches!(err, DataStoreError::ResourceExhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let request = CreateRequest::with_length(1);

        let files = join_all((0..50).map(|_| store.create(&request))).await;
        let ids: HashSet<String> = files.into_iter().map(|f| f.unwrap().id().to_string()).collect();
        assert_eq!(ids.len(), 50);
    }

    #[tokio::test]
    async fn terminate_leaves_only_a_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let file = store.create(&CreateRequest::with_length(1)).await.unwrap();

        store.terminate(file.id()).await.unwrap();
        let upload_dir = store.root_path().join(file.id());
        assert!(upload_dir.join("terminated").exists());
        assert!(!upload_dir.join("file").exists());
        assert!(!upload_dir.join("info.json").exists());

        assert!(matches!(store.get_offset(file.id()).await, Err(DataStoreError::NotFound(_))));
        assert!(matches!(
            store.write(WriteRequest::new(file.id(), 0, &b"a"[..])).await,
            Err(DataStoreError::NotFound(_))
        ));
        assert!(!store.exists(file.id()).await.unwrap());
        assert!(matches!(store.terminate(file.id()).await, Err(DataStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn terminated_ids_are_never_reissued() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::new(dir.path().to_string_lossy())
            .unwrap()
            .with_naming_function(|_| "fixed".to_string());
        let store = FileSystemStore::new(options).await.unwrap();

        let file = store.create(&CreateRequest::with_length(1)).await.unwrap();
        store.terminate(file.id()).await.unwrap();

        let err = store.create(&CreateRequest::with_length(1)).await.unwrap_err();
        assert!(matches!(err, DataStoreError::ResourceExhausted { .. }));
    }

    #[tokio::test]
    async fn nul_in_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let err = store.get_offset("a\0b").await.unwrap_err();
        assert!(matches!(err, DataStoreError::NotFound(_)));
        assert_eq!(err.code(), "ENOENT");
    }
}
