use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use geojson::{Feature, FeatureCollection, GeoJson};
use thiserror::Error;

use super::{
    feature::{merge_properties, Properties},
    file_lock::FileLock,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The file exists but does not hold a GeoJSON FeatureCollection. The file is left in place
    /// until it is cleared manually.
    #[error("{path:?} is not a valid GeoJSON FeatureCollection: {reason}")]
    CorruptData { path: PathBuf, reason: String },
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    /// Appending failed, the previous file contents are unchanged.
    #[error("failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to delete {path:?}: {source}")]
    Delete { path: PathBuf, source: io::Error },
    #[error("failed to lock {path:?}: {source}")]
    Lock { path: PathBuf, source: io::Error },
}

pub fn empty_collection() -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: Vec::new(),
        foreign_members: None,
    }
}

/// Who may read a file written by [`write_atomically`] when it does not exist yet. An existing
/// file keeps its permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Shared,
    Private,
}

/// Persists the FeatureCollection of a single collection kind in one GeoJSON file.
///
/// A missing file is equivalent to an empty collection. Every change holds an exclusive lock on
/// `<file>.lock` for the whole read-modify-write, so writers in other threads, other store
/// instances and other processes are serialised. The new contents are written to a temporary
/// file that is renamed over the target, so readers only ever observe a complete file.
#[derive(Debug)]
pub struct FeatureStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FeatureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<FeatureCollection, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(empty_collection()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        parse_feature_collection(&self.path, &contents)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.load()?.features.len())
    }

    /// Append `feature`, with `properties` merged into it, after the existing features.
    ///
    /// Concurrent appends are applied one after the other in the order they acquire the lock,
    /// none is lost.
    pub fn append(&self, mut feature: Feature, properties: Properties) -> Result<(), StoreError> {
        let _lock = self.lock()?;

        let mut collection = self.load()?;
        merge_properties(&mut feature, properties);
        collection.features.push(feature);
        self.write(collection)?;
        log::debug!("Appended feature to {:?}", self.path);
        Ok(())
    }

    /// Delete the backing file. A file that does not exist counts as success.
    pub fn invalidate(&self) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.remove_file()
    }

    /// Drop `uploaded` from the front of the collection and keep whatever was appended after it
    /// was loaded. The file is deleted once nothing is left. A file that no longer starts with
    /// `uploaded` was replaced in the meantime and is kept whole.
    ///
    /// Returns the number of features left in the store.
    pub fn remove_uploaded(&self, uploaded: &[Feature]) -> Result<usize, StoreError> {
        let _lock = self.lock()?;

        let mut collection = self.load()?;
        if !collection.features.starts_with(uploaded) {
            log::warn!(
                "{:?} changed during the upload, keeping all {} features",
                self.path,
                collection.features.len()
            );
            return Ok(collection.features.len());
        }
        if collection.features.len() == uploaded.len() {
            self.remove_file()?;
            return Ok(0);
        }

        collection.features.drain(..uploaded.len());
        let remaining = collection.features.len();
        self.write(collection)?;
        log::info!(
            "Kept {} features appended to {:?} during the upload",
            remaining,
            self.path
        );
        Ok(remaining)
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.lock_path).map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })
    }

    fn write(&self, collection: FeatureCollection) -> Result<(), StoreError> {
        let contents = GeoJson::from(collection).to_string();
        write_atomically(&self.path, &contents, FileAccess::Shared).map_err(|source| {
            StoreError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn remove_file(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("Removed {:?}", self.path);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Delete {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn parse_feature_collection(path: &Path, contents: &str) -> Result<FeatureCollection, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptData {
        path: path.to_path_buf(),
        reason,
    };
    match contents.parse::<GeoJson>() {
        Ok(GeoJson::FeatureCollection(collection)) => Ok(collection),
        Ok(_) => Err(corrupt("expected a FeatureCollection".to_string())),
        Err(err) => Err(corrupt(err.to_string())),
    }
}

#[cfg(unix)]
fn new_file_permissions(access: FileAccess) -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    match access {
        FileAccess::Shared => Some(fs::Permissions::from_mode(0o644)),
        FileAccess::Private => Some(fs::Permissions::from_mode(0o600)),
    }
}

#[cfg(not(unix))]
fn new_file_permissions(_access: FileAccess) -> Option<fs::Permissions> {
    None
}

/// Write `contents` to a temporary file next to `path` and rename it over `path`. On failure the
/// previous file is left untouched.
pub fn write_atomically(path: &Path, contents: &str, access: FileAccess) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    let permissions = match fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(_) => new_file_permissions(access),
    };
    if let Some(permissions) = permissions {
        file.as_file().set_permissions(permissions)?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
