use std::path::Path;

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

use drivesync_core::{FileId, ServerFile};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("checksum row not found")]
    MissingRow,
}

/// Insert form of an index row; the store assigns the rowid.
#[derive(Debug, Clone, PartialEq)]
pub struct ChecksumInput {
    pub file_id: FileId,
    pub version: Option<String>,
    pub sequence_number: i64,
    pub checksum: String,
}

impl ChecksumInput {
    pub fn for_file(file: &ServerFile, checksum: impl Into<String>) -> Self {
        Self {
            file_id: file.file_id(),
            version: file.version.clone(),
            sequence_number: file.sequence_number,
            checksum: checksum.into(),
        }
    }
}

/// One index row: a store identity and the content checksum last observed
/// for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChecksum {
    pub id: i64,
    pub file_id: FileId,
    pub version: Option<String>,
    pub sequence_number: i64,
    pub checksum: String,
}

impl FileChecksum {
    /// The same row pointed at a new store identity; the checksum value is
    /// kept because the content did not change.
    pub fn relocated_to(&self, file: &ServerFile) -> FileChecksum {
        FileChecksum {
            id: self.id,
            file_id: file.file_id(),
            version: file.version.clone(),
            sequence_number: file.sequence_number,
            checksum: self.checksum.clone(),
        }
    }
}

pub struct ChecksumStore {
    pool: SqlitePool,
}

impl ChecksumStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn insert_checksum(&self, input: &ChecksumInput) -> Result<FileChecksum, IndexError> {
        let result = sqlx::query(
            "INSERT INTO file_checksums (store_id, folder_id, version, sequence_number, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&input.file_id.store_id)
        .bind(&input.file_id.folder_id)
        .bind(&input.version)
        .bind(input.sequence_number)
        .bind(&input.checksum)
        .execute(&self.pool)
        .await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or(IndexError::MissingRow)
    }

    pub async fn update_checksum(&self, row: &FileChecksum) -> Result<FileChecksum, IndexError> {
        sqlx::query(
            "UPDATE file_checksums
             SET store_id = ?1, folder_id = ?2, version = ?3, sequence_number = ?4, checksum = ?5
             WHERE id = ?6",
        )
        .bind(&row.file_id.store_id)
        .bind(&row.file_id.folder_id)
        .bind(&row.version)
        .bind(row.sequence_number)
        .bind(&row.checksum)
        .bind(row.id)
        .execute(&self.pool)
        .await?;

        self.get_by_id(row.id).await?.ok_or(IndexError::MissingRow)
    }

    pub async fn update_checksums(&self, rows: &[FileChecksum]) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "UPDATE file_checksums
                 SET store_id = ?1, folder_id = ?2, version = ?3, sequence_number = ?4, checksum = ?5
                 WHERE id = ?6",
            )
            .bind(&row.file_id.store_id)
            .bind(&row.file_id.folder_id)
            .bind(&row.version)
            .bind(row.sequence_number)
            .bind(&row.checksum)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_checksum(&self, row: &FileChecksum) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM file_checksums WHERE id = ?1")
            .bind(row.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_checksum_for(
        &self,
        file_id: &FileId,
        version: Option<&str>,
        sequence_number: i64,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "DELETE FROM file_checksums
             WHERE store_id = ?1 AND folder_id = ?2 AND version IS ?3 AND sequence_number = ?4",
        )
        .bind(&file_id.store_id)
        .bind(&file_id.folder_id)
        .bind(version)
        .bind(sequence_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_checksums(&self, rows: &[FileChecksum]) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query("DELETE FROM file_checksums WHERE id = ?1")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drops every row for a store identity, whatever version or sequence it
    /// was recorded at. Used when the file itself is known to be gone.
    pub async fn remove_checksums_for_file(&self, file_id: &FileId) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM file_checksums WHERE store_id = ?1 AND folder_id = ?2")
            .bind(&file_id.store_id)
            .bind(&file_id.folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_checksum(
        &self,
        file_id: &FileId,
        version: Option<&str>,
        sequence_number: i64,
    ) -> Result<Option<FileChecksum>, IndexError> {
        let row = sqlx::query(
            "SELECT id, store_id, folder_id, version, sequence_number, checksum
             FROM file_checksums
             WHERE store_id = ?1 AND folder_id = ?2 AND version IS ?3 AND sequence_number = ?4",
        )
        .bind(&file_id.store_id)
        .bind(&file_id.folder_id)
        .bind(version)
        .bind(sequence_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| read_checksum(&row)).transpose()
    }

    pub async fn get_checksums_in_folder(
        &self,
        folder_id: &str,
    ) -> Result<Vec<FileChecksum>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, store_id, folder_id, version, sequence_number, checksum
             FROM file_checksums
             WHERE folder_id = ?1
             ORDER BY id ASC",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_checksum).collect()
    }

    pub async fn all_checksums(&self) -> Result<Vec<FileChecksum>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, store_id, folder_id, version, sequence_number, checksum
             FROM file_checksums
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_checksum).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<FileChecksum>, IndexError> {
        let row = sqlx::query(
            "SELECT id, store_id, folder_id, version, sequence_number, checksum
             FROM file_checksums
             WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| read_checksum(&row)).transpose()
    }
}

fn read_checksum(row: &sqlx::sqlite::SqliteRow) -> Result<FileChecksum, IndexError> {
    Ok(FileChecksum {
        id: row.try_get("id")?,
        file_id: FileId {
            store_id: row.try_get("store_id")?,
            folder_id: row.try_get("folder_id")?,
        },
        version: row.try_get("version")?,
        sequence_number: row.try_get("sequence_number")?,
        checksum: row.try_get("checksum")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn make_store() -> ChecksumStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = ChecksumStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn input(store_id: &str, folder_id: &str, seq: i64, checksum: &str) -> ChecksumInput {
        ChecksumInput {
            file_id: FileId {
                store_id: store_id.into(),
                folder_id: folder_id.into(),
            },
            version: Some("1".into()),
            sequence_number: seq,
            checksum: checksum.into(),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_by_identity() {
        let store = make_store().await;
        let inserted = store
            .insert_checksum(&input("f1", "d1", 1, "abc"))
            .await
            .unwrap();

        let fetched = store
            .get_checksum(&inserted.file_id, Some("1"), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, inserted);
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected() {
        let store = make_store().await;
        store
            .insert_checksum(&input("f1", "d1", 1, "abc"))
            .await
            .unwrap();
        let err = store
            .insert_checksum(&input("f1", "d1", 1, "def"))
            .await
            .expect_err("expected unique-index violation");
        assert!(matches!(err, IndexError::Sqlx(_)));
    }

    #[tokio::test]
    async fn update_relocates_in_place() {
        let store = make_store().await;
        let row = store
            .insert_checksum(&input("f1", "d1", 1, "abc"))
            .await
            .unwrap();

        let moved = ServerFile {
            store_id: "f1".into(),
            folder_id: "d2".into(),
            version: Some("1".into()),
            sequence_number: 2,
            file_name: "abc".into(),
        };
        let updated = store.update_checksum(&row.relocated_to(&moved)).await.unwrap();

        assert_eq!(updated.id, row.id);
        assert_eq!(updated.file_id.folder_id, "d2");
        assert_eq!(updated.sequence_number, 2);
        assert_eq!(updated.checksum, "abc");
        assert_eq!(store.all_checksums().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_update_applies_every_row() {
        let store = make_store().await;
        let a = store
            .insert_checksum(&input("f1", "d1", 1, "aaa"))
            .await
            .unwrap();
        let b = store
            .insert_checksum(&input("f2", "d1", 1, "bbb"))
            .await
            .unwrap();

        let mut a2 = a.clone();
        a2.sequence_number = 5;
        let mut b2 = b.clone();
        b2.sequence_number = 6;
        store.update_checksums(&[a2, b2]).await.unwrap();

        let rows = store.all_checksums().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.sequence_number >= 5));
    }

    #[tokio::test]
    async fn remove_by_identity_handles_null_version() {
        let store = make_store().await;
        let mut unversioned = input("f1", "d1", 3, "abc");
        unversioned.version = None;
        let row = store.insert_checksum(&unversioned).await.unwrap();

        store
            .remove_checksum_for(&row.file_id, None, 3)
            .await
            .unwrap();
        assert!(store.all_checksums().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_for_file_drops_every_version() {
        let store = make_store().await;
        store
            .insert_checksum(&input("f1", "d1", 1, "aaa"))
            .await
            .unwrap();
        store
            .insert_checksum(&input("f1", "d1", 2, "bbb"))
            .await
            .unwrap();
        let other = store
            .insert_checksum(&input("f2", "d1", 1, "ccc"))
            .await
            .unwrap();

        store
            .remove_checksums_for_file(&FileId {
                store_id: "f1".into(),
                folder_id: "d1".into(),
            })
            .await
            .unwrap();

        assert_eq!(store.all_checksums().await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn batch_remove_deletes_listed_rows_only() {
        let store = make_store().await;
        let a = store
            .insert_checksum(&input("f1", "d1", 1, "aaa"))
            .await
            .unwrap();
        let b = store
            .insert_checksum(&input("f2", "d1", 1, "bbb"))
            .await
            .unwrap();
        let keep = store
            .insert_checksum(&input("f3", "d1", 1, "ccc"))
            .await
            .unwrap();

        store.remove_checksums(&[a, b]).await.unwrap();
        assert_eq!(store.all_checksums().await.unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn lists_rows_by_folder() {
        let store = make_store().await;
        store
            .insert_checksum(&input("f1", "d1", 1, "aaa"))
            .await
            .unwrap();
        store
            .insert_checksum(&input("f2", "d2", 1, "bbb"))
            .await
            .unwrap();

        let rows = store.get_checksums_in_folder("d2").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_id.store_id, "f2");
    }

    #[tokio::test]
    async fn open_creates_the_database_file() {
        let dir = tempdir().unwrap();
        let store = ChecksumStore::open(&dir.path().join("checksums.db"))
            .await
            .unwrap();
        store
            .insert_checksum(&input("f1", "d1", 1, "abc"))
            .await
            .unwrap();
        assert_eq!(store.all_checksums().await.unwrap().len(), 1);
    }
}
