use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use drivesync_core::{EMPTY_CONTENT_MD5, FileStore, Folder, ServerFile, StoreError, VersionRef};

use crate::action::{ActionKind, ActionOutcome, ServerVersion, SyncAction};
use crate::checksums::{ChecksumInput, ChecksumStore, IndexError};
use crate::config::ExecutorConfig;
use crate::metrics::SyncMetrics;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("checksum index error: {0}")]
    Index(#[from] IndexError),
    #[error("version of {name} not found")]
    VersionNotFound { name: String },
    #[error("download of {name} carries no source version but non-empty content")]
    MissingSource { name: String },
}

/// Applies already-diffed synchronization actions for one synchronized
/// folder, keeping the checksum index consistent with the store: the index
/// is only written after the corresponding store call succeeded.
pub struct ActionExecutor<S> {
    pub(crate) store: S,
    pub(crate) checksums: ChecksumStore,
    pub(crate) folder: String,
    pub(crate) config: ExecutorConfig,
    pub(crate) metrics: Arc<SyncMetrics>,
}

impl<S: FileStore> ActionExecutor<S> {
    pub fn new(store: S, checksums: ChecksumStore, folder: impl Into<String>) -> Self {
        Self {
            store,
            checksums,
            folder: folder.into(),
            config: ExecutorConfig::default(),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub async fn execute(&self, action: &SyncAction) -> Result<ActionOutcome, ExecuteError> {
        match action {
            SyncAction::Edit {
                version,
                new_version,
                target,
            } => Ok(ActionOutcome::Version(
                self.execute_edit(version, new_version, target.as_ref())
                    .await?,
            )),
            SyncAction::Download {
                source,
                new_version,
            } => Ok(ActionOutcome::Version(
                self.execute_download(source.as_ref(), new_version).await?,
            )),
            SyncAction::Remove { version } => {
                Ok(ActionOutcome::Removed(self.remove_file(version).await?))
            }
        }
    }

    /// REMOVE runs as one optimized batch; every other kind executes
    /// individually in list order. Handing in an action that does not match
    /// `kind` is a caller bug and panics.
    pub async fn batch_execute(
        &self,
        kind: ActionKind,
        actions: &[SyncAction],
    ) -> Result<Vec<ActionOutcome>, ExecuteError> {
        for action in actions {
            assert!(
                action.kind() == kind,
                "batch_execute received a {:?} action in a {:?} batch",
                action.kind(),
                kind
            );
        }

        if kind == ActionKind::Remove {
            let versions: Vec<ServerVersion> = actions
                .iter()
                .filter_map(|action| match action {
                    SyncAction::Remove { version } => Some(version.clone()),
                    _ => None,
                })
                .collect();
            let removals = self.batch_remove(&versions).await?;
            return Ok(removals.into_iter().map(ActionOutcome::Removed).collect());
        }

        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            outcomes.push(self.execute(action).await?);
        }
        Ok(outcomes)
    }

    async fn execute_edit(
        &self,
        version: &ServerVersion,
        new_version: &VersionRef,
        target: Option<&ServerVersion>,
    ) -> Result<ServerVersion, ExecuteError> {
        let moved = if let Some(target) = target {
            // The destination is overwritten; its checksum row must not be
            // readable once the content underneath it changes.
            self.checksums.remove_checksum(&target.checksum).await?;
            self.store.move_file(&version.file, &target.file).await?
        } else {
            self.store
                .rename_file(&version.file, &new_version.name)
                .await?
        };

        // Content did not change, identity did: the source's row follows the
        // file instead of being re-inserted.
        let row = self
            .checksums
            .update_checksum(&version.checksum.relocated_to(&moved))
            .await?;
        debug!(file = %moved.file_name, "edit applied");
        Ok(ServerVersion::new(moved, row))
    }

    async fn execute_download(
        &self,
        source: Option<&ServerVersion>,
        new_version: &VersionRef,
    ) -> Result<ServerVersion, ExecuteError> {
        let Some(source) = source else {
            if !new_version.is_empty_content() {
                return Err(ExecuteError::MissingSource {
                    name: new_version.name.clone(),
                });
            }
            // Empty content needs no transfer and no comparison.
            self.clear_target_slot(&new_version.name).await?;
            let created = self
                .store
                .create_file(&self.folder, &new_version.name, &[])
                .await?;
            let row = self
                .checksums
                .insert_checksum(&ChecksumInput::for_file(&created, EMPTY_CONTENT_MD5))
                .await?;
            return Ok(ServerVersion::new(created, row));
        };

        let current = self.store.get_file(&source.file.store_id, None).await?;

        // A non-versioning store offers no stable version handle; the
        // sequence number captured at diff time is the only guard against
        // copying concurrently changed content.
        if source.file.version.is_none() {
            let matches = current
                .as_ref()
                .is_some_and(|c| c.sequence_number == source.file.sequence_number);
            if !matches {
                return Err(ExecuteError::VersionNotFound {
                    name: source.file.file_name.clone(),
                });
            }
        }

        let occupant = self.clear_target_slot(&new_version.name).await?;

        let in_temp = match self.temp_folder(false).await? {
            Some(temp) => current.as_ref().is_some_and(|c| c.folder_id == temp.id),
            None => false,
        };
        let is_current = current
            .as_ref()
            .is_some_and(|c| c.version == source.file.version);

        if is_current && in_temp {
            // The quarantined copy already carries this content; renaming it
            // back into place undeletes it instead of copying bytes.
            let moved = match &occupant {
                Some(existing) => self.store.move_file(&source.file, existing).await?,
                None => {
                    self.store
                        .move_file_to(&source.file, &new_version.name, &self.folder)
                        .await?
                }
            };
            let row = self
                .checksums
                .update_checksum(&source.checksum.relocated_to(&moved))
                .await?;
            self.metrics.record_undelete();
            debug!(file = %moved.file_name, "undeleted from quarantine");
            return Ok(ServerVersion::new(moved, row));
        }

        let copied = match &occupant {
            Some(existing) => self.store.copy_file(&source.file, existing).await,
            None => {
                self.store
                    .copy_file_to(&source.file, &new_version.name, &self.folder)
                    .await
            }
        };
        let copied = match copied {
            Ok(file) => file,
            Err(StoreError::NotFound(reason)) => {
                // The source vanished under us; nothing its rows describe
                // exists any more.
                warn!(file = %source.file.file_name, %reason, "copy source vanished, dropping its checksum rows");
                self.checksums
                    .remove_checksums_for_file(&source.file.file_id())
                    .await?;
                return Err(StoreError::NotFound(reason).into());
            }
            Err(err) => return Err(err.into()),
        };

        let row = self
            .checksums
            .insert_checksum(&ChecksumInput::for_file(&copied, source.checksum.checksum.clone()))
            .await?;
        Ok(ServerVersion::new(copied, row))
    }

    /// Removes the checksum row of whatever currently occupies `name` in the
    /// synchronized folder, returning the occupant.
    async fn clear_target_slot(&self, name: &str) -> Result<Option<ServerFile>, ExecuteError> {
        let occupant = self
            .store
            .get_file_by_name(&self.folder, name, true)
            .await?;
        if let Some(existing) = &occupant {
            self.checksums
                .remove_checksum_for(
                    &existing.file_id(),
                    existing.version.as_deref(),
                    existing.sequence_number,
                )
                .await?;
        }
        Ok(occupant)
    }

    pub(crate) fn temp_folder_path(&self) -> String {
        format!(
            "{}/{}",
            self.folder.trim_end_matches('/'),
            self.config.temp_folder_name
        )
    }

    pub(crate) async fn temp_folder(&self, create: bool) -> Result<Option<Folder>, ExecuteError> {
        if !self.store.has_temp_folder() {
            return Ok(None);
        }
        Ok(self
            .store
            .opt_folder(&self.temp_folder_path(), create)
            .await?)
    }
}
