use std::collections::HashSet;

use tracing::{debug, warn};

use drivesync_core::{EMPTY_CONTENT_MD5, FileStore, ServerFile, StoreError};

use crate::action::{Removal, ServerVersion};
use crate::checksums::FileChecksum;
use crate::executor::{ActionExecutor, ExecuteError};

impl<S: FileStore> ActionExecutor<S> {
    /// Single-file deletion policy: trash when the store has one, quarantine
    /// when it is worth it, hard delete otherwise.
    pub(crate) async fn remove_file(&self, version: &ServerVersion) -> Result<Removal, ExecuteError> {
        if self.store.has_trash_folder() {
            // Trash is store-managed and not checksum-indexed.
            self.store.delete_file(&version.file, false).await?;
            self.checksums.remove_checksum(&version.checksum).await?;
            self.metrics.record_trashed(1);
            return Ok(Removal::Trashed);
        }

        if !self.store.has_temp_folder() || version.checksum.checksum == EMPTY_CONTENT_MD5 {
            return self.hard_delete_single(version).await;
        }

        self.metrics.record_temp_move_attempt();
        match self.quarantine_move(version).await {
            Ok(moved) if moved.file_name == version.checksum.checksum => {
                let row = self
                    .checksums
                    .update_checksum(&version.checksum.relocated_to(&moved))
                    .await?;
                self.metrics.record_quarantined(1);
                debug!(file = %version.file.file_name, "parked in quarantine");
                Ok(Removal::Quarantined(ServerVersion::new(moved, row)))
            }
            Ok(moved) => {
                // The store renamed the mover: this content already sits in
                // quarantine, so the extra copy has no value.
                self.metrics.record_quarantine_collision();
                self.store.delete_file(&moved, true).await?;
                self.checksums.remove_checksum(&version.checksum).await?;
                self.metrics.record_hard_deleted(1);
                Ok(Removal::HardDeleted)
            }
            Err(err) => {
                warn!(file = %version.file.file_name, error = %err, "quarantine move failed, falling back to hard delete");
                self.hard_delete_single(version).await
            }
        }
    }

    /// Batch deletion policy. Sub-steps run in a fixed order: optimistic
    /// recheck, quarantine attempts (with one batched row update), one
    /// batched hard delete, one batched row cleanup.
    pub(crate) async fn batch_remove(
        &self,
        versions: &[ServerVersion],
    ) -> Result<Vec<Removal>, ExecuteError> {
        if versions.is_empty() {
            return Ok(Vec::new());
        }
        if self.store.has_trash_folder() {
            return self.batch_remove_to_trash(versions).await;
        }

        let mut outcomes = vec![Removal::Skipped; versions.len()];
        let mut candidates: Vec<usize> = Vec::new();
        let mut hard: Vec<usize> = Vec::new();
        let mut selected: HashSet<&str> = HashSet::new();
        for (index, version) in versions.iter().enumerate() {
            let checksum = version.checksum.checksum.as_str();
            let quarantine = self.store.has_temp_folder()
                && checksum != EMPTY_CONTENT_MD5
                && candidates.len() < self.config.move_to_temp_limit
                && selected.insert(checksum);
            if quarantine {
                candidates.push(index);
            } else {
                hard.push(index);
            }
        }

        // Past the threshold a folder listing is cheaper than provoking the
        // collisions one move at a time.
        if candidates.len() > self.config.optimistic_move_to_temp_threshold {
            self.metrics.record_optimistic_recheck();
            if let Some(temp) = self.temp_folder(false).await? {
                let known: HashSet<String> = self
                    .checksums
                    .get_checksums_in_folder(&temp.id)
                    .await?
                    .into_iter()
                    .map(|row| row.checksum)
                    .collect();
                let (kept, predictable): (Vec<usize>, Vec<usize>) = candidates
                    .into_iter()
                    .partition(|&index| !known.contains(&versions[index].checksum.checksum));
                if !predictable.is_empty() {
                    debug!(
                        count = predictable.len(),
                        "rerouting predictable quarantine collisions to hard delete"
                    );
                }
                candidates = kept;
                hard.extend(predictable);
            }
        }

        let mut row_updates: Vec<FileChecksum> = Vec::new();
        let mut hard_files: Vec<(usize, ServerFile)> = hard
            .iter()
            .map(|&index| (index, versions[index].file.clone()))
            .collect();

        for &index in &candidates {
            let version = &versions[index];
            self.metrics.record_temp_move_attempt();
            match self.quarantine_move(version).await {
                Ok(moved) if moved.file_name == version.checksum.checksum => {
                    let row = version.checksum.relocated_to(&moved);
                    row_updates.push(row.clone());
                    outcomes[index] = Removal::Quarantined(ServerVersion::new(moved, row));
                }
                Ok(moved) => {
                    self.metrics.record_quarantine_collision();
                    hard_files.push((index, moved));
                }
                Err(err) => {
                    warn!(file = %version.file.file_name, error = %err, "quarantine move failed, rerouting to hard delete");
                    hard_files.push((index, version.file.clone()));
                }
            }
        }

        if !row_updates.is_empty() {
            self.metrics.record_quarantined(row_updates.len() as u64);
            self.checksums.update_checksums(&row_updates).await?;
        }

        let mut removed_rows: Vec<FileChecksum> = Vec::new();
        if !hard_files.is_empty() {
            let ids: Vec<String> = hard_files
                .iter()
                .map(|(_, file)| file.store_id.clone())
                .collect();
            let max_sequence = hard_files
                .iter()
                .map(|(_, file)| file.sequence_number)
                .max()
                .unwrap_or(0);
            let not_removed = self
                .store
                .remove_files_by_id(&ids, max_sequence, true)
                .await?;
            let survivors: HashSet<&str> = not_removed.iter().map(String::as_str).collect();
            let mut deleted = 0u64;
            for (index, file) in &hard_files {
                if survivors.contains(file.store_id.as_str()) {
                    // The file outlived the batch, so its row stays with it.
                    warn!(file = %file.file_name, "store refused the batched hard delete, keeping the checksum row");
                    outcomes[*index] = Removal::Skipped;
                } else {
                    removed_rows.push(versions[*index].checksum.clone());
                    outcomes[*index] = Removal::HardDeleted;
                    deleted += 1;
                }
            }
            self.metrics.record_hard_deleted(deleted);
        }
        if !removed_rows.is_empty() {
            self.checksums.remove_checksums(&removed_rows).await?;
        }

        Ok(outcomes)
    }

    async fn batch_remove_to_trash(
        &self,
        versions: &[ServerVersion],
    ) -> Result<Vec<Removal>, ExecuteError> {
        let files: Vec<ServerFile> = versions.iter().map(|v| v.file.clone()).collect();
        let not_removed = self.store.delete_files(&files, false).await?;
        let survivors: HashSet<&str> = not_removed.iter().map(|f| f.store_id.as_str()).collect();

        let mut outcomes = Vec::with_capacity(versions.len());
        let mut removed_rows = Vec::new();
        for version in versions {
            if survivors.contains(version.file.store_id.as_str()) {
                warn!(file = %version.file.file_name, "store reported the file as not removed, keeping the checksum row");
                outcomes.push(Removal::Skipped);
            } else {
                removed_rows.push(version.checksum.clone());
                outcomes.push(Removal::Trashed);
            }
        }
        if !removed_rows.is_empty() {
            self.metrics.record_trashed(removed_rows.len() as u64);
            self.checksums.remove_checksums(&removed_rows).await?;
        }
        Ok(outcomes)
    }

    async fn quarantine_move(&self, version: &ServerVersion) -> Result<ServerFile, StoreError> {
        let path = self.temp_folder_path();
        self.store.opt_folder(&path, true).await?;
        self.store
            .move_file_to(&version.file, &version.checksum.checksum, &path)
            .await
    }

    async fn hard_delete_single(&self, version: &ServerVersion) -> Result<Removal, ExecuteError> {
        match self.store.delete_file(&version.file, true).await {
            Ok(()) => {}
            // A file that is already gone needs no second delete; the row
            // still has to go.
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        self.checksums.remove_checksum(&version.checksum).await?;
        self.metrics.record_hard_deleted(1);
        Ok(Removal::HardDeleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ActionOutcome, SyncAction};
    use crate::checksums::{ChecksumInput, ChecksumStore};
    use drivesync_core::{MemoryFileStore, StoreCaps, VersionRef, content_md5};
    use sqlx::SqlitePool;

    const fn caps(trash: bool, temp: bool, versioning: bool) -> StoreCaps {
        StoreCaps {
            trash_folder: trash,
            temp_folder: temp,
            versioning,
        }
    }

    async fn make_executor(caps: StoreCaps) -> ActionExecutor<MemoryFileStore> {
        let store = MemoryFileStore::new(caps);
        store.opt_folder("/sync", true).await.unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let checksums = ChecksumStore::from_pool(pool);
        checksums.init().await.unwrap();
        ActionExecutor::new(store, checksums, "/sync")
    }

    async fn seed(
        executor: &ActionExecutor<MemoryFileStore>,
        name: &str,
        data: &[u8],
    ) -> ServerVersion {
        let file = executor.store.create_file("/sync", name, data).await.unwrap();
        let row = executor
            .checksums
            .insert_checksum(&ChecksumInput::for_file(&file, content_md5(data)))
            .await
            .unwrap();
        ServerVersion::new(file, row)
    }

    fn remove_actions(versions: &[ServerVersion]) -> Vec<SyncAction> {
        versions
            .iter()
            .map(|version| SyncAction::Remove {
                version: version.clone(),
            })
            .collect()
    }

    fn removals(outcomes: Vec<ActionOutcome>) -> Vec<Removal> {
        outcomes
            .into_iter()
            .map(|outcome| match outcome {
                ActionOutcome::Removed(removal) => removal,
                other => panic!("expected a removal outcome, got {other:?}"),
            })
            .collect()
    }

    async fn temp_live_count(executor: &ActionExecutor<MemoryFileStore>) -> usize {
        let temp_id = executor
            .store
            .get_folder_id(&executor.temp_folder_path())
            .await
            .unwrap();
        executor
            .store
            .live_files()
            .into_iter()
            .filter(|file| file.folder_id == temp_id)
            .count()
    }

    #[tokio::test]
    async fn trash_capable_remove_soft_deletes_and_drops_the_row() {
        let executor = make_executor(caps(true, true, true)).await;
        let a = seed(&executor, "A.txt", b"content").await;

        let removal = executor.remove_file(&a).await.unwrap();
        assert_eq!(removal, Removal::Trashed);
        assert!(executor.checksums.all_checksums().await.unwrap().is_empty());
        assert_eq!(executor.store.trashed_files().len(), 1);
        assert_eq!(executor.metrics().trashed(), 1);
    }

    #[tokio::test]
    async fn remove_without_temp_support_hard_deletes() {
        let executor = make_executor(caps(false, false, true)).await;
        let a = seed(&executor, "A.txt", b"content").await;

        let removal = executor.remove_file(&a).await.unwrap();
        assert_eq!(removal, Removal::HardDeleted);
        assert!(executor.store.live_files().is_empty());
        assert!(executor.checksums.all_checksums().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_content_skips_the_quarantine_detour() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "empty.txt", b"").await;

        let removal = executor.remove_file(&a).await.unwrap();
        assert_eq!(removal, Removal::HardDeleted);
        assert_eq!(executor.metrics().temp_move_attempts(), 0);
    }

    #[tokio::test]
    async fn remove_quarantines_under_the_checksum_name() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"payload").await;
        let checksum = a.checksum.checksum.clone();

        let removal = executor.remove_file(&a).await.unwrap();
        let Removal::Quarantined(parked) = removal else {
            panic!("expected quarantine, got {removal:?}");
        };
        assert_eq!(parked.file.file_name, checksum);
        let temp_id = executor
            .store
            .get_folder_id(&executor.temp_folder_path())
            .await
            .unwrap();
        assert_eq!(parked.file.folder_id, temp_id);

        let rows = executor.checksums.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_id.folder_id, temp_id);
        assert_eq!(rows[0].checksum, checksum);
    }

    #[tokio::test]
    async fn quarantine_collision_discards_the_duplicate() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"same content").await;
        let b = seed(&executor, "B.txt", b"same content").await;

        assert!(matches!(
            executor.remove_file(&a).await.unwrap(),
            Removal::Quarantined(_)
        ));
        assert_eq!(executor.remove_file(&b).await.unwrap(), Removal::HardDeleted);

        assert_eq!(executor.metrics().quarantine_collisions(), 1);
        assert_eq!(temp_live_count(&executor).await, 1);
        assert_eq!(executor.checksums.all_checksums().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quarantine_failure_falls_back_to_hard_delete() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"content").await;
        // Vanishes behind the executor's back; the move will fail.
        executor.store.delete_file(&a.file, true).await.unwrap();

        let removal = executor.remove_file(&a).await.unwrap();
        assert_eq!(removal, Removal::HardDeleted);
        assert!(executor.checksums.all_checksums().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quarantine_round_trip_restores_the_same_row() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"payload").await;
        let row_id = a.checksum.id;
        let checksum = a.checksum.checksum.clone();

        let Removal::Quarantined(parked) = executor.remove_file(&a).await.unwrap() else {
            panic!("expected quarantine");
        };

        let outcome = executor
            .execute(&SyncAction::Download {
                source: Some(parked),
                new_version: VersionRef::new("A.txt", checksum.clone()),
            })
            .await
            .unwrap();
        let ActionOutcome::Version(restored) = outcome else {
            panic!("expected a version outcome");
        };

        assert_eq!(restored.file.file_name, "A.txt");
        let sync_id = executor.store.get_folder_id("/sync").await.unwrap();
        assert_eq!(restored.file.folder_id, sync_id);

        let rows = executor.checksums.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, row_id);
        assert_eq!(rows[0].checksum, checksum);
        assert_eq!(executor.metrics().undeletes(), 1);
        assert_eq!(temp_live_count(&executor).await, 0);
    }

    #[tokio::test]
    async fn batch_trash_keeps_rows_for_survivors() {
        let executor = make_executor(caps(true, false, true)).await;
        let a = seed(&executor, "A.txt", b"aaa").await;
        let b = seed(&executor, "B.txt", b"bbb").await;
        // B changes concurrently; the snapshot in the action goes stale.
        executor.store.rename_file(&b.file, "B2.txt").await.unwrap();

        let outcomes = executor
            .batch_execute(ActionKind::Remove, &remove_actions(&[a.clone(), b.clone()]))
            .await
            .unwrap();

        assert_eq!(
            removals(outcomes),
            vec![Removal::Trashed, Removal::Skipped]
        );
        let rows = executor.checksums.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, b.checksum.id);
        assert_eq!(executor.store.trashed_files().len(), 1);
    }

    #[tokio::test]
    async fn batch_hard_delete_keeps_rows_for_refused_ids() {
        let executor = make_executor(caps(false, false, true)).await;
        let a = seed(&executor, "A.txt", b"aaa").await;
        let b = seed(&executor, "B.txt", b"bbb").await;
        // B moves past the batch's concurrency token.
        executor.store.rename_file(&b.file, "B2.txt").await.unwrap();

        let outcomes = executor
            .batch_execute(ActionKind::Remove, &remove_actions(&[a.clone(), b.clone()]))
            .await
            .unwrap();

        assert_eq!(
            removals(outcomes),
            vec![Removal::HardDeleted, Removal::Skipped]
        );
        let rows = executor.checksums.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, b.checksum.id);
        assert_eq!(executor.store.live_files().len(), 1);
    }

    #[tokio::test]
    async fn batch_dedups_identical_content_within_the_batch() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"same").await;
        let b = seed(&executor, "B.txt", b"same").await;

        let outcomes = executor
            .batch_execute(ActionKind::Remove, &remove_actions(&[a, b]))
            .await
            .unwrap();

        let outcomes = removals(outcomes);
        assert!(matches!(outcomes[0], Removal::Quarantined(_)));
        assert_eq!(outcomes[1], Removal::HardDeleted);
        assert_eq!(temp_live_count(&executor).await, 1);
        assert_eq!(executor.checksums.all_checksums().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_caps_quarantine_at_the_move_to_temp_limit() {
        let executor = make_executor(caps(false, true, true)).await;
        let limit = executor.config.move_to_temp_limit;
        let mut versions = Vec::new();
        for i in 0..limit + 5 {
            let name = format!("file-{i}.txt");
            versions.push(seed(&executor, &name, name.as_bytes()).await);
        }

        let outcomes = removals(
            executor
                .batch_execute(ActionKind::Remove, &remove_actions(&versions))
                .await
                .unwrap(),
        );

        let quarantined = outcomes
            .iter()
            .filter(|o| matches!(o, Removal::Quarantined(_)))
            .count();
        let hard_deleted = outcomes
            .iter()
            .filter(|o| matches!(o, Removal::HardDeleted))
            .count();
        assert_eq!(quarantined, limit);
        assert_eq!(hard_deleted, 5);
        assert_eq!(temp_live_count(&executor).await, limit);
    }

    #[tokio::test]
    async fn at_the_threshold_the_optimistic_recheck_is_skipped() {
        let executor = make_executor(caps(false, true, true)).await;
        let threshold = executor.config.optimistic_move_to_temp_threshold;

        let mut first = Vec::new();
        for i in 0..threshold {
            let name = format!("file-{i}.txt");
            first.push(seed(&executor, &name, name.as_bytes()).await);
        }
        executor
            .batch_execute(ActionKind::Remove, &remove_actions(&first))
            .await
            .unwrap();
        assert_eq!(executor.metrics().optimistic_rechecks(), 0);

        // Same contents again: every move provokes a collision, because at
        // the threshold the folder listing is not worth it.
        let mut second = Vec::new();
        for i in 0..threshold {
            let name = format!("file-{i}.txt");
            second.push(seed(&executor, &name, name.as_bytes()).await);
        }
        let outcomes = removals(
            executor
                .batch_execute(ActionKind::Remove, &remove_actions(&second))
                .await
                .unwrap(),
        );

        assert!(outcomes.iter().all(|o| *o == Removal::HardDeleted));
        assert_eq!(executor.metrics().optimistic_rechecks(), 0);
        assert_eq!(executor.metrics().quarantine_collisions(), threshold as u64);
        assert_eq!(
            executor.metrics().temp_move_attempts(),
            2 * threshold as u64
        );
    }

    #[tokio::test]
    async fn above_the_threshold_predictable_collisions_are_rerouted() {
        let executor = make_executor(caps(false, true, true)).await;
        let count = executor.config.optimistic_move_to_temp_threshold + 1;

        let mut first = Vec::new();
        for i in 0..count {
            let name = format!("file-{i}.txt");
            first.push(seed(&executor, &name, name.as_bytes()).await);
        }
        executor
            .batch_execute(ActionKind::Remove, &remove_actions(&first))
            .await
            .unwrap();
        assert_eq!(executor.metrics().optimistic_rechecks(), 1);
        assert_eq!(executor.metrics().temp_move_attempts(), count as u64);

        let mut second = Vec::new();
        for i in 0..count {
            let name = format!("file-{i}.txt");
            second.push(seed(&executor, &name, name.as_bytes()).await);
        }
        let outcomes = removals(
            executor
                .batch_execute(ActionKind::Remove, &remove_actions(&second))
                .await
                .unwrap(),
        );

        assert!(outcomes.iter().all(|o| *o == Removal::HardDeleted));
        assert_eq!(executor.metrics().optimistic_rechecks(), 2);
        // No new move attempts: the listing predicted every collision.
        assert_eq!(executor.metrics().temp_move_attempts(), count as u64);
        assert_eq!(executor.metrics().quarantine_collisions(), 0);
    }

    #[tokio::test]
    async fn batch_remove_of_nothing_is_a_no_op() {
        let executor = make_executor(caps(false, true, true)).await;
        let outcomes = executor
            .batch_execute(ActionKind::Remove, &[])
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn no_checksum_row_outlives_its_file() {
        let executor = make_executor(caps(false, true, true)).await;
        let a = seed(&executor, "A.txt", b"aaa").await;
        let b = seed(&executor, "B.txt", b"bbb").await;
        let c = seed(&executor, "C.txt", b"ccc").await;

        executor
            .execute(&SyncAction::Edit {
                version: a.clone(),
                new_version: VersionRef::new("A2.txt", a.checksum.checksum.clone()),
                target: None,
            })
            .await
            .unwrap();
        executor
            .execute(&SyncAction::Remove { version: b })
            .await
            .unwrap();
        executor
            .execute(&SyncAction::Download {
                source: Some(c.clone()),
                new_version: VersionRef::new("C-copy.txt", c.checksum.checksum.clone()),
            })
            .await
            .unwrap();

        let live: HashSet<String> = executor
            .store
            .live_files()
            .into_iter()
            .map(|file| file.store_id)
            .collect();
        let rows = executor.checksums.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 4);
        for row in rows {
            assert!(
                live.contains(&row.file_id.store_id),
                "row {row:?} points at a file that no longer exists"
            );
        }
    }
}
