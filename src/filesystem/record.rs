use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::data_store::{Offset, UploadLength};
use crate::{DataStoreError, File, Result};

pub(super) const INFO_FILE: &str = "info.json";
const INFO_TMP_FILE: &str = "info.json.tmp";

/// Contents of `info.json`: the created [`File`] plus the durable offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct UploadRecord {
    pub file: File,
    pub offset: u64,
    pub upload_length: UploadLength,
}

impl UploadRecord {
    pub fn new(file: File) -> Self {
        Self {
            upload_length: UploadLength::of(&file),
            file,
            offset: 0,
        }
    }

    pub fn offset(&self) -> Offset {
        Offset {
            size: self.offset,
            upload_length: self.upload_length,
        }
    }

    pub async fn load(upload_dir: &Path, file_id: &str) -> Result<Self> {
        let raw = match fs::read(upload_dir.join(INFO_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DataStoreError::NotFound(file_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&raw)?)
    }

    /// Replaces `info.json` through a temp file and rename, so readers see
    /// either the previous record or this one.
    pub async fn store(&self, upload_dir: &Path) -> Result<()> {
        let tmp_path = upload_dir.join(INFO_TMP_FILE);
        let encoded = serde_json::to_vec(self)?;

        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(&encoded).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, upload_dir.join(INFO_FILE)).await?;
        Ok(())
    }
}
