use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::store::{FileStore, Folder, ServerFile, StoreCaps, StoreError};

/// Hash-map-backed [`FileStore`] used by executor tests and local
/// development. Concurrency conflicts are modeled through `sequence_number`:
/// a stale snapshot handed to a batch delete makes the store report that
/// file as not removed, and moving into an occupied name slot renames the
/// mover (`name (1)`), the same way the remote backends behave.
///
/// Old versions are not retained; `get_file` with an explicit version only
/// resolves when it matches the current one.
pub struct MemoryFileStore {
    caps: StoreCaps,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    folders: HashMap<String, Folder>,
    files: HashMap<String, Entry>,
    trash: HashMap<String, Entry>,
    next_id: u64,
}

#[derive(Clone)]
struct Entry {
    file: ServerFile,
    data: Vec<u8>,
}

impl State {
    fn next_file_id(&mut self) -> String {
        self.next_id += 1;
        format!("f{}", self.next_id)
    }

    fn next_folder_id(&mut self) -> String {
        self.next_id += 1;
        format!("d{}", self.next_id)
    }

    fn folder_by_path(&self, path: &str) -> Option<Folder> {
        self.folders.values().find(|f| f.path == path).cloned()
    }

    fn name_taken(&self, folder_id: &str, name: &str, exclude: Option<&str>) -> bool {
        self.files.values().any(|entry| {
            entry.file.folder_id == folder_id
                && entry.file.file_name == name
                && Some(entry.file.store_id.as_str()) != exclude
        })
    }

    fn available_name(&self, folder_id: &str, want: &str, exclude: Option<&str>) -> String {
        if !self.name_taken(folder_id, want, exclude) {
            return want.to_string();
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{want} ({suffix})");
            if !self.name_taken(folder_id, &candidate, exclude) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn missing_file(id: &str) -> StoreError {
    StoreError::NotFound(format!("file {id}"))
}

fn missing_folder(path: &str) -> StoreError {
    StoreError::NotFound(format!("folder {path}"))
}

impl MemoryFileStore {
    pub fn new(caps: StoreCaps) -> Self {
        Self {
            caps,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_content_version(&self, file: &mut ServerFile) {
        if self.caps.versioning {
            let next = file
                .version
                .as_deref()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            file.version = Some(next.to_string());
        }
    }

    fn initial_version(&self) -> Option<String> {
        self.caps.versioning.then(|| "1".to_string())
    }

    /// Every non-trashed file currently in the store.
    pub fn live_files(&self) -> Vec<ServerFile> {
        self.lock().files.values().map(|e| e.file.clone()).collect()
    }

    pub fn trashed_files(&self) -> Vec<ServerFile> {
        self.lock().trash.values().map(|e| e.file.clone()).collect()
    }

    pub fn file_data(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().files.get(id).map(|e| e.data.clone())
    }
}

impl FileStore for MemoryFileStore {
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
        let mut state = self.lock();
        let moved = state
            .files
            .remove(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?;
        let dest = state
            .files
            .get_mut(&destination.store_id)
            .ok_or_else(|| missing_file(&destination.store_id))?;
        dest.data = moved.data;
        dest.file.sequence_number += 1;
        self.bump_content_version(&mut dest.file);
        Ok(dest.file.clone())
    }

    async fn move_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut state = self.lock();
        let folder = state
            .folder_by_path(folder_path)
            .ok_or_else(|| missing_folder(folder_path))?;
        if !state.files.contains_key(&source.store_id) {
            return Err(missing_file(&source.store_id));
        }
        let name = state.available_name(&folder.id, new_name, Some(&source.store_id));
        let entry = state
            .files
            .get_mut(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?;
        entry.file.folder_id = folder.id;
        entry.file.file_name = name;
        entry.file.sequence_number += 1;
        Ok(entry.file.clone())
    }

    async fn rename_file(
        &self,
        source: &ServerFile,
        new_name: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut state = self.lock();
        let folder_id = state
            .files
            .get(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?
            .file
            .folder_id
            .clone();
        let name = state.available_name(&folder_id, new_name, Some(&source.store_id));
        let entry = state
            .files
            .get_mut(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?;
        entry.file.file_name = name;
        entry.file.sequence_number += 1;
        Ok(entry.file.clone())
    }

    async fn copy_file(
        &self,
        source: &ServerFile,
        destination: &ServerFile,
    ) -> Result<ServerFile, StoreError> {
        let mut state = self.lock();
        let data = state
            .files
            .get(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?
            .data
            .clone();
        let dest = state
            .files
            .get_mut(&destination.store_id)
            .ok_or_else(|| missing_file(&destination.store_id))?;
        dest.data = data;
        dest.file.sequence_number += 1;
        self.bump_content_version(&mut dest.file);
        Ok(dest.file.clone())
    }

    async fn copy_file_to(
        &self,
        source: &ServerFile,
        new_name: &str,
        folder_path: &str,
    ) -> Result<ServerFile, StoreError> {
        let mut state = self.lock();
        let folder = state
            .folder_by_path(folder_path)
            .ok_or_else(|| missing_folder(folder_path))?;
        let data = state
            .files
            .get(&source.store_id)
            .ok_or_else(|| missing_file(&source.store_id))?
            .data
            .clone();
        let name = state.available_name(&folder.id, new_name, None);
        let id = state.next_file_id();
        let file = ServerFile {
            store_id: id.clone(),
            folder_id: folder.id,
            version: self.initial_version(),
            sequence_number: 1,
            file_name: name,
        };
        state.files.insert(
            id,
            Entry {
                file: file.clone(),
                data,
            },
        );
        Ok(file)
    }

    async fn create_file(
        &self,
        folder_path: &str,
        name: &str,
        data: &[u8],
    ) -> Result<ServerFile, StoreError> {
        let mut state = self.lock();
        let folder = state
            .folder_by_path(folder_path)
            .ok_or_else(|| missing_folder(folder_path))?;
        let existing = state
            .files
            .values()
            .find(|e| e.file.folder_id == folder.id && e.file.file_name == name)
            .map(|e| e.file.store_id.clone());
        if let Some(id) = existing {
            // Upload over an occupied name replaces the content in place.
            let entry = state.files.get_mut(&id).ok_or_else(|| missing_file(&id))?;
            entry.data = data.to_vec();
            entry.file.sequence_number += 1;
            self.bump_content_version(&mut entry.file);
            return Ok(entry.file.clone());
        }
        let id = state.next_file_id();
        let file = ServerFile {
            store_id: id.clone(),
            folder_id: folder.id,
            version: self.initial_version(),
            sequence_number: 1,
            file_name: name.to_string(),
        };
        state.files.insert(
            id,
            Entry {
                file: file.clone(),
                data: data.to_vec(),
            },
        );
        Ok(file)
    }

    async fn delete_file(&self, file: &ServerFile, hard: bool) -> Result<(), StoreError> {
        let mut state = self.lock();
        let entry = state
            .files
            .remove(&file.store_id)
            .ok_or_else(|| missing_file(&file.store_id))?;
        if !hard && self.caps.trash_folder {
            state.trash.insert(file.store_id.clone(), entry);
        }
        Ok(())
    }

    async fn delete_files(
        &self,
        files: &[ServerFile],
        hard: bool,
    ) -> Result<Vec<ServerFile>, StoreError> {
        let mut state = self.lock();
        let mut not_removed = Vec::new();
        for file in files {
            let Some(entry) = state.files.get(&file.store_id) else {
                // Already gone; nothing left to refuse.
                continue;
            };
            if entry.file.sequence_number != file.sequence_number {
                not_removed.push(entry.file.clone());
                continue;
            }
            let entry = state
                .files
                .remove(&file.store_id)
                .ok_or_else(|| missing_file(&file.store_id))?;
            if !hard && self.caps.trash_folder {
                state.trash.insert(file.store_id.clone(), entry);
            }
        }
        Ok(not_removed)
    }

    async fn remove_files_by_id(
        &self,
        ids: &[String],
        max_sequence: i64,
        hard: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        let mut not_removed = Vec::new();
        for id in ids {
            let Some(entry) = state.files.get(id) else {
                continue;
            };
            if entry.file.sequence_number > max_sequence {
                not_removed.push(id.clone());
                continue;
            }
            let entry = state.files.remove(id).ok_or_else(|| missing_file(id))?;
            if !hard && self.caps.trash_folder {
                state.trash.insert(id.clone(), entry);
            }
        }
        Ok(not_removed)
    }

    async fn get_file(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<ServerFile>, StoreError> {
        let state = self.lock();
        let Some(entry) = state.files.get(id) else {
            return Ok(None);
        };
        match version {
            None => Ok(Some(entry.file.clone())),
            Some(v) if entry.file.version.as_deref() == Some(v) => Ok(Some(entry.file.clone())),
            Some(_) => Ok(None),
        }
    }

    async fn get_file_by_name(
        &self,
        folder_path: &str,
        name: &str,
        _current_only: bool,
    ) -> Result<Option<ServerFile>, StoreError> {
        let state = self.lock();
        let Some(folder) = state.folder_by_path(folder_path) else {
            return Ok(None);
        };
        Ok(state
            .files
            .values()
            .find(|e| e.file.folder_id == folder.id && e.file.file_name == name)
            .map(|e| e.file.clone()))
    }

    async fn get_folder_id(&self, path: &str) -> Result<String, StoreError> {
        let state = self.lock();
        state
            .folder_by_path(path)
            .map(|f| f.id)
            .ok_or_else(|| missing_folder(path))
    }

    async fn opt_folder(&self, path: &str, create: bool) -> Result<Option<Folder>, StoreError> {
        let mut state = self.lock();
        if let Some(folder) = state.folder_by_path(path) {
            return Ok(Some(folder));
        }
        if !create {
            return Ok(None);
        }
        let id = state.next_folder_id();
        let folder = Folder {
            id: id.clone(),
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
        };
        state.folders.insert(id, folder.clone());
        Ok(Some(folder))
    }

    async fn get_folder(&self, id: &str) -> Result<Folder, StoreError> {
        let state = self.lock();
        state
            .folders
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("folder id {id}")))
    }
}
