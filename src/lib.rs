//! Storage contract for tus resumable uploads.
//!
//! A [`DataStore`] reserves uploads ([`DataStore::create`]), appends bytes at
//! a client-asserted offset ([`DataStore::write`]) and reports progress
//! ([`DataStore::get_offset`]). Two backends are provided: [`MemoryStore`]
//! and the durable [`FileSystemStore`].

mod data_store;
mod error;
mod file;
mod filesystem;
mod locks;
mod memory;
mod metadata;
mod options;
mod request;
mod uid;

pub use data_store::{DataStore, Offset, UploadLength};
pub use error::{DataStoreError, Result};
pub use file::File;
pub use filesystem::FileSystemStore;
pub use locks::{UploadGuard, UploadLocks};
pub use memory::MemoryStore;
pub use metadata::{Metadata, MetadataError};
pub use options::{NamingFunction, StoreOptions, DEFAULT_ID_RETRY_BUDGET};
pub use request::{CreateRequest, TusHeader, WriteRequest};
pub use uid::Uid;
