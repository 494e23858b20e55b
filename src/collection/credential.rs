use std::{
    fs, io,
    path::{Path, PathBuf},
};

use geojson::{JsonObject, JsonValue};
use thiserror::Error;

use crate::geofile::feature_store::{write_atomically, FileAccess};

/// Opaque user-identity fields written by the login flow and attached to uploads as-is.
pub type Credential = JsonObject;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential found at {path:?}, log in first")]
    Missing { path: PathBuf },
    #[error("credential file {path:?} is not a JSON object: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to read credential {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write credential {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Credential, CredentialError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CredentialError::Missing {
                    path: self.path.clone(),
                })
            }
            Err(source) => {
                return Err(CredentialError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        match serde_json::from_str::<JsonValue>(&contents) {
            Ok(JsonValue::Object(credential)) => Ok(credential),
            Ok(_) => Err(CredentialError::Corrupt {
                path: self.path.clone(),
                reason: "expected a JSON object".to_string(),
            }),
            Err(err) => Err(CredentialError::Corrupt {
                path: self.path.clone(),
                reason: err.to_string(),
            }),
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let contents = JsonValue::Object(credential.clone()).to_string();
        write_atomically(&self.path, &contents, FileAccess::Private).map_err(|source| {
            CredentialError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use geojson::JsonValue;
    use rstest::rstest;
    use serde_json::json;
    use testdir::testdir;

    use super::{CredentialError, CredentialStore};

    #[rstest]
    fn test_missing_credential() {
        let store = CredentialStore::new(testdir!().join("user-info.json"));
        assert!(matches!(store.load(), Err(CredentialError::Missing { .. })));
    }

    #[rstest]
    #[case("not json at all")]
    #[case("[1, 2, 3]")]
    fn test_corrupt_credential(#[case] contents: &str) {
        let path = testdir!().join("user-info.json");
        fs::write(&path, contents).unwrap();
        let store = CredentialStore::new(path);
        assert!(matches!(store.load(), Err(CredentialError::Corrupt { .. })));
    }

    #[rstest]
    fn test_save_then_load() {
        let store = CredentialStore::new(testdir!().join("user-info.json"));
        let credential = match json!({"username": "surveyor", "organization": "tcat"}) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        };
        store.save(&credential).unwrap();
        assert_eq!(credential, store.load().unwrap());
    }

    #[cfg(unix)]
    #[rstest]
    fn test_saved_credential_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let store = CredentialStore::new(testdir!().join("user-info.json"));
        store.save(&serde_json::Map::new()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
    }
}
