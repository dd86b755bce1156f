use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::{FileStore, Folder, ServerFile, StoreCaps, StoreError};

/// HTTP backend for a remote drive API. Capability flags are probed once at
/// [`DriveApiClient::connect`] because the executor reads them synchronously.
#[derive(Clone)]
pub struct DriveApiClient {
    http: Client,
    base_url: Url,
    token: String,
    caps: StoreCaps,
}

#[derive(Debug, Deserialize, Serialize)]
struct CapabilitiesDto {
    #[serde(default)]
    trash_folder: bool,
    #[serde(default)]
    temp_folder: bool,
    #[serde(default)]
    versioning: bool,
}

#[derive(Debug, Serialize)]
struct BatchDeleteRequest<'a> {
    files: &'a [ServerFile],
    hard: bool,
}

#[derive(Debug, Deserialize)]
struct BatchDeleteResponse {
    #[serde(default)]
    not_removed: Vec<ServerFile>,
}

#[derive(Debug, Serialize)]
struct BatchRemoveByIdRequest<'a> {
    ids: &'a [String],
    max_sequence: i64,
    hard: bool,
}

#[derive(Debug, Deserialize)]
struct BatchRemoveByIdResponse {
    #[serde(default)]
    not_removed: Vec<String>,
}

impl DriveApiClient {
    pub async fn connect(base_url: &str, token: impl Into<String>) -> Result<Self, StoreError> {
        let mut client = Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            caps: StoreCaps {
                trash_folder: false,
                temp_folder: false,
                versioning: false,
            },
        };
        let url = client.endpoint("/v1/capabilities")?;
        let response = client
            .http
            .get(url)
            .header("Authorization", client.auth_header_value())
            .send()
            .await?;
        let caps: CapabilitiesDto = Self::handle_response(response).await?;
        client.caps = StoreCaps {
            trash_folder: caps.trash_folder,
            temp_folder: caps.temp_folder,
            versioning: caps.versioning,
        };
        Ok(client)
    }

    pub fn caps(&self) -> StoreCaps {
        self.caps
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND {
                Err(StoreError::NotFound(body))
            } else {
                Err(StoreError::Api { status, body })
            }
        }
    }

    /// Like [`Self::handle_response`] but turns NOT_FOUND into `None`.
    async fn handle_optional<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Option<T>, StoreError> {
        match Self::handle_response(response).await {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_file_op(&self, url: Url) -> Result<ServerFile, StoreError> {
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }
}

impl FileStore for DriveApiClient {
    fn has_trash_folder(&self) -> bool {
        self.caps.trash_folder
    }

    fn has_temp_folder(&self) -> bool {
        self.caps.temp_folder
    }

    async fn move_file(
        &self,
        source: &ServerFile,
        destination: &ServerFile,
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files/move")?;
        url.query_pairs_mut()
            .append_pair("id", &source.store_id)
            .append_pair("dest", &destination.store_id);
        self.put_file_op(url).await
    }

    async fn move_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files/move")?;
        url.query_pairs_mut()
            .append_pair("id", &source.store_id)
            .append_pair("name", new_name)
            .append_pair("folder", folder_path);
        self.put_file_op(url).await
    }

    async fn rename_file(
        &self,
        source: &ServerFile,
        new_name: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files/rename")?;
        url.query_pairs_mut()
            .append_pair("id", &source.store_id)
            .append_pair("name", new_name);
        self.put_file_op(url).await
    }

    async fn copy_file(
        &self,
        source: &ServerFile,
        destination: &ServerFile,
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files/copy")?;
        url.query_pairs_mut()
            .append_pair("id", &source.store_id)
            .append_pair("dest", &destination.store_id);
        self.put_file_op(url).await
    }

    async fn copy_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files/copy")?;
        url.query_pairs_mut()
            .append_pair("id", &source.store_id)
            .append_pair("name", new_name)
            .append_pair("folder", folder_path);
        self.put_file_op(url).await
    }

    async fn create_file(
        &self,
        folder_path: &str,
        name: &str,
        data: &[u8],
    ) -> Result<ServerFile, StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        url.query_pairs_mut()
            .append_pair("folder", folder_path)
            .append_pair("name", name);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .body(data.to_vec())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn delete_file(&self, file: &ServerFile, hard: bool) -> Result<(), StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        url.query_pairs_mut()
            .append_pair("id", &file.store_id)
            .append_pair("hard", if hard { "true" } else { "false" });
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            Err(StoreError::NotFound(body))
        } else {
            Err(StoreError::Api { status, body })
        }
    }

    async fn delete_files(
        &self,
        files: &[ServerFile],
        hard: bool,
    ) -> Result<Vec<ServerFile>, StoreError> {
        let url = self.endpoint("/v1/files/delete")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&BatchDeleteRequest { files, hard })
            .send()
            .await?;
        let payload: BatchDeleteResponse = Self::handle_response(response).await?;
        Ok(payload.not_removed)
    }

    async fn remove_files_by_id(
        &self,
        ids: &[String],
        max_sequence: i64,
        hard: bool,
    ) -> Result<Vec<String>, StoreError> {
        let url = self.endpoint("/v1/files/delete-by-id")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&BatchRemoveByIdRequest {
                ids,
                max_sequence,
                hard,
            })
            .send()
            .await?;
        let payload: BatchRemoveByIdResponse = Self::handle_response(response).await?;
        Ok(payload.not_removed)
    }

    async fn get_file(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<ServerFile>, StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("id", id);
            if let Some(version) = version {
                query.append_pair("version", version);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_optional(response).await
    }

    async fn get_file_by_name(
        &self,
        folder_path: &str,
        name: &str,
        current_only: bool,
    ) -> Result<Option<ServerFile>, StoreError> {
        let mut url = self.endpoint("/v1/files/lookup")?;
        url.query_pairs_mut()
            .append_pair("folder", folder_path)
            .append_pair("name", name)
            .append_pair("current_only", if current_only { "true" } else { "false" });
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_optional(response).await
    }

    async fn get_folder_id(&self, path: &str) -> Result<String, StoreError> {
        let mut url = self.endpoint("/v1/folders")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let folder: Folder = Self::handle_response(response).await?;
        Ok(folder.id)
    }

    async fn opt_folder(&self, path: &str, create: bool) -> Result<Option<Folder>, StoreError> {
        let mut url = self.endpoint("/v1/folders")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if let Some(folder) = Self::handle_optional(response).await? {
            return Ok(Some(folder));
        }
        if !create {
            return Ok(None);
        }
        let mut url = self.endpoint("/v1/folders")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Ok(Some(Self::handle_response(response).await?))
    }

    async fn get_folder(&self, id: &str) -> Result<Folder, StoreError> {
        let url = self.endpoint(&format!("/v1/folders/{id}"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }
}
