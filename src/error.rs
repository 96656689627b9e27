use thiserror::Error;

/// Errors surfaced by [`crate::DataStore`] implementations and their configuration.
#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("ENOENT: upload `{0}` not found")]
    NotFound(String),

    #[error("offset mismatch: upload is at {expected}, request asserted {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("could not reserve a unique upload id after {attempts} attempts")]
    ResourceExhausted { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DataStoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Short, stable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "EINVAL",
            Self::NotFound(_) => "ENOENT",
            Self::OffsetMismatch { .. } => "EOFFSET",
            Self::ResourceExhausted { .. } => "EEXHAUSTED",
            Self::Io(_) | Self::Serialization(_) => "EIO",
        }
    }

    /// Backend failures, as opposed to the request-level kinds above.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Serialization(_))
    }
}

pub type Result<T> = std::result::Result<T, DataStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_reads_as_enoent() {
        let err = DataStoreError::NotFound("abc".to_string());
        assert_eq!(err.code(), "ENOENT");
        assert!(err.to_string().starts_with("ENOENT"));
        assert!(!err.is_storage_failure());
    }

    #[test]
    fn io_errors_are_storage_failures() {
        let err: DataStoreError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.code(), "EIO");
        assert!(err.is_storage_failure());
    }
}
