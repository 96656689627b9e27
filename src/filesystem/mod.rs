pub mod file_store;
mod record;

pub use file_store::FileSystemStore;
