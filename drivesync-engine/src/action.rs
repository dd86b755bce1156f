use drivesync_core::{ServerFile, VersionRef};

use crate::checksums::FileChecksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Edit,
    Download,
    Remove,
}

/// A server-side version: the store's file record paired with the index row
/// describing its content.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerVersion {
    pub file: ServerFile,
    pub checksum: FileChecksum,
}

impl ServerVersion {
    pub fn new(file: ServerFile, checksum: FileChecksum) -> Self {
        Self { file, checksum }
    }
}

/// One pending change produced by the diff step, carrying exactly the fields
/// its kind needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Rename a file, or move it onto `target`'s identity when the
    /// destination already exists and must be overwritten.
    Edit {
        version: ServerVersion,
        new_version: VersionRef,
        target: Option<ServerVersion>,
    },
    /// Materialize `new_version` on the server from an existing server-side
    /// `source` (or from nothing, for empty content).
    Download {
        source: Option<ServerVersion>,
        new_version: VersionRef,
    },
    Remove {
        version: ServerVersion,
    },
}

impl SyncAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Edit { .. } => ActionKind::Edit,
            SyncAction::Download { .. } => ActionKind::Download,
            SyncAction::Remove { .. } => ActionKind::Remove,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The version the action produced (EDIT and DOWNLOAD).
    Version(ServerVersion),
    Removed(Removal),
}

/// Terminal state of one removed file.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Trashed,
    /// Parked in the temp-quarantine folder under its checksum name; a later
    /// upload of identical content can undelete it.
    Quarantined(ServerVersion),
    HardDeleted,
    /// The store reported the file as not removed; its checksum row is kept.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivesync_core::FileId;

    fn version() -> ServerVersion {
        let file = ServerFile {
            store_id: "f1".into(),
            folder_id: "d1".into(),
            version: None,
            sequence_number: 1,
            file_name: "A.txt".into(),
        };
        let checksum = FileChecksum {
            id: 1,
            file_id: FileId {
                store_id: "f1".into(),
                folder_id: "d1".into(),
            },
            version: None,
            sequence_number: 1,
            checksum: "abc".into(),
        };
        ServerVersion::new(file, checksum)
    }

    #[test]
    fn kind_matches_variant() {
        let remove = SyncAction::Remove { version: version() };
        assert_eq!(remove.kind(), ActionKind::Remove);

        let download = SyncAction::Download {
            source: None,
            new_version: VersionRef::new("A.txt", "abc"),
        };
        assert_eq!(download.kind(), ActionKind::Download);

        let edit = SyncAction::Edit {
            version: version(),
            new_version: VersionRef::new("B.txt", "abc"),
            target: None,
        };
        assert_eq!(edit.kind(), ActionKind::Edit);
    }
}
