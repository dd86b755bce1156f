mod client;
mod memory;
mod store;

pub use client::DriveApiClient;
pub use memory::MemoryFileStore;
pub use store::{
    ApiErrorClass, EMPTY_CONTENT_MD5, FileId, FileStore, Folder, ServerFile, StoreCaps,
    StoreError, VersionRef, content_md5,
};
