use std::path::PathBuf;

use super::kind::CollectionKind;

const CREDENTIAL_FILE_NAME: &str = "user-info.json";
const UPLOAD_LOCK_FILE_NAME: &str = "upload.lock";

/// All files sit in one injected data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    data_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn collection_path(&self, kind: CollectionKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    pub fn credential_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIAL_FILE_NAME)
    }

    pub fn upload_lock_path(&self) -> PathBuf {
        self.data_dir.join(UPLOAD_LOCK_FILE_NAME)
    }
}
