use bytes::Bytes;
use http::header::HeaderMap;
use std::str::FromStr;

use crate::{DataStoreError, Result};

/// tus protocol header names the store's inputs and outputs map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TusHeader {
    Extensions,
    UploadLength,
    UploadDeferLength,
    UploadOffset,
    UploadMetadata,
}

impl TusHeader {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extensions => "Tus-Extension",
            Self::UploadLength => "Upload-Length",
            Self::UploadDeferLength => "Upload-Defer-Length",
            Self::UploadOffset => "Upload-Offset",
            Self::UploadMetadata => "Upload-Metadata",
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, header: TusHeader) -> Result<Option<&'a str>> {
    match headers.get(header.name()) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| DataStoreError::invalid(format!("{} is not valid ASCII", header.name()))),
        None => Ok(None),
    }
}

fn header_u64(headers: &HeaderMap, header: TusHeader) -> Result<Option<u64>> {
    match header_str(headers, header)? {
        Some(value) => u64::from_str(value.trim()).map(Some).map_err(|_| {
            DataStoreError::invalid(format!("{} must be a non-negative integer", header.name()))
        }),
        None => Ok(None),
    }
}

/// Signals carried by a creation (POST) request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub upload_length: Option<u64>,
    pub upload_defer_length: Option<bool>,
    pub upload_metadata: Option<String>,
}

impl CreateRequest {
    pub fn with_length(upload_length: u64) -> Self {
        Self {
            upload_length: Some(upload_length),
            ..Default::default()
        }
    }

    pub fn deferred() -> Self {
        Self {
            upload_defer_length: Some(true),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.upload_metadata = Some(metadata.into());
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let upload_length = header_u64(headers, TusHeader::UploadLength)?;

        let upload_defer_length = match header_str(headers, TusHeader::UploadDeferLength)? {
            Some("1") => Some(true),
            Some(_) => {
                return Err(DataStoreError::invalid("Upload-Defer-Length must be 1"));
            }
            None => None,
        };

        let upload_metadata = header_str(headers, TusHeader::UploadMetadata)?
            .filter(|metadata| !metadata.is_empty())
            .map(String::from);

        Ok(Self {
            upload_length,
            upload_defer_length,
            upload_metadata,
        })
    }
}

/// A PATCH: bytes to append to `file_id` starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub file_id: String,
    pub offset: u64,
    pub data: Bytes,
    /// Final length for an upload created with a deferred length.
    pub upload_length: Option<u64>,
}

impl WriteRequest {
    pub fn new(file_id: impl Into<String>, offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            file_id: file_id.into(),
            offset,
            data: data.into(),
            upload_length: None,
        }
    }

    pub fn with_upload_length(mut self, upload_length: u64) -> Self {
        self.upload_length = Some(upload_length);
        self
    }

    pub fn from_headers(file_id: impl Into<String>, headers: &HeaderMap, data: Bytes) -> Result<Self> {
        let offset = header_u64(headers, TusHeader::UploadOffset)?
            .ok_or_else(|| DataStoreError::invalid("Upload-Offset header is required"))?;

        Ok(Self {
            file_id: file_id.into(),
            offset,
            data,
            upload_length: header_u64(headers, TusHeader::UploadLength)?,
        })
    }
}
