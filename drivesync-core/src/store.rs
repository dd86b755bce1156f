use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Checksum of zero bytes. Empty files are tagged with this sentinel so the
/// executor can special-case them without hashing anything.
pub const EMPTY_CONTENT_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

pub fn content_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("store returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl StoreError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            StoreError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Composite identity of a file within the store: the storage id plus the
/// folder it currently lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    pub store_id: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFile {
    pub store_id: String,
    pub folder_id: String,
    /// Storage-assigned version. Absent when the store is non-versioning.
    #[serde(default)]
    pub version: Option<String>,
    /// Monotonic per-file modification counter, used as the
    /// optimistic-concurrency token.
    pub sequence_number: i64,
    pub file_name: String,
}

impl ServerFile {
    pub fn file_id(&self) -> FileId {
        FileId {
            store_id: self.store_id.clone(),
            folder_id: self.folder_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub path: String,
    pub name: String,
}

/// A file version as described by the sync peer: a name and a content
/// checksum, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
    pub name: String,
    pub checksum: String,
}

impl VersionRef {
    pub fn new(name: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checksum: checksum.into(),
        }
    }

    pub fn is_empty_content(&self) -> bool {
        self.checksum == EMPTY_CONTENT_MD5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCaps {
    pub trash_folder: bool,
    pub temp_folder: bool,
    pub versioning: bool,
}

/// Backend contract the executor runs against. Batch methods report the
/// entries they could NOT remove so callers can reconcile; capability flags
/// decide which deletion tier applies.
pub trait FileStore {
    fn has_trash_folder(&self) -> bool;
    fn has_temp_folder(&self) -> bool;

    /// Move `source` onto an existing destination identity, overwriting it.
    fn move_file(
        &self,
        source: &ServerFile,
        destination: &ServerFile,
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    fn move_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    fn rename_file(
        &self,
        source: &ServerFile,
        new_name: &str,
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    /// Copy `source` onto an existing destination identity, overwriting it.
    fn copy_file(
        &self,
        source: &ServerFile,
        destination: &ServerFile,
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    /// Fails with [`StoreError::NotFound`] when the source vanished.
    fn copy_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    fn create_file(
        &self,
        folder_path: &str,
        name: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<ServerFile, StoreError>>;

    fn delete_file(
        &self,
        file: &ServerFile,
        hard: bool,
    ) -> impl Future<Output = Result<(), StoreError>>;

    /// Returns the files that were NOT removed (lost races).
    fn delete_files(
        &self,
        files: &[ServerFile],
        hard: bool,
    ) -> impl Future<Output = Result<Vec<ServerFile>, StoreError>>;

    /// Batched removal by id with `max_sequence` as the concurrency token;
    /// returns the ids that were NOT removed.
    fn remove_files_by_id(
        &self,
        ids: &[String],
        max_sequence: i64,
        hard: bool,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>>;

    /// `version` of `None` resolves the current version.
    fn get_file(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> impl Future<Output = Result<Option<ServerFile>, StoreError>>;

    fn get_file_by_name(
        &self,
        folder_path: &str,
        name: &str,
        current_only: bool,
    ) -> impl Future<Output = Result<Option<ServerFile>, StoreError>>;

    fn get_folder_id(&self, path: &str) -> impl Future<Output = Result<String, StoreError>>;

    fn opt_folder(
        &self,
        path: &str,
        create: bool,
    ) -> impl Future<Output = Result<Option<Folder>, StoreError>>;

    fn get_folder(&self, id: &str) -> impl Future<Output = Result<Folder, StoreError>>;
}
