use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::PathBuf,
};

use geojson::Feature;
use indicatif::ProgressBar;
use rayon::prelude::*;
use thiserror::Error;

use super::submit::{SubmissionError, Submitter};
use crate::{
    collection::{
        credential::{Credential, CredentialError},
        kind::CollectionKind,
        manager::{CollectionManager, InvalidationReport},
    },
    geofile::{feature::stamp_user_info, feature_store::StoreError, file_lock::FileLock},
};

/// Errors that stop an upload cycle before any collection is submitted.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("an upload is already in progress")]
    InProgress,
    #[error("failed to lock {path:?}: {source}")]
    Lock { path: PathBuf, source: io::Error },
    #[error("no credential found at {path:?}, log in before uploading")]
    MissingCredential { path: PathBuf },
    #[error(transparent)]
    Credential(CredentialError),
}

/// Failure of a single collection within a cycle. Siblings are still submitted.
#[derive(Debug, Error)]
pub enum CollectionUploadError {
    #[error(transparent)]
    Load(#[from] StoreError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

#[derive(Debug, Default)]
pub struct UploadReport {
    /// Collections that had a file at the start of the cycle.
    pub attempted: BTreeSet<CollectionKind>,
    pub succeeded: BTreeSet<CollectionKind>,
    pub failed: BTreeMap<CollectionKind, CollectionUploadError>,
    /// Set only when every attempted collection was accepted.
    pub invalidation: Option<InvalidationReport>,
}

impl UploadReport {
    pub fn num_succeeded(&self) -> usize {
        self.succeeded.len()
    }

    pub fn num_failed(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs upload cycles over all non-empty collections. Only one cycle runs per data directory,
/// across coordinators and processes.
///
/// Collections are submitted in parallel. Once every submission has finished, either the uploaded
/// features of all attempted collections are removed (nothing failed) or nothing is, so a failed
/// cycle can simply be retried. A retry resubmits the whole file, including features the server
/// may already have accepted in a previous partially failed cycle.
pub struct UploadCoordinator<S: Submitter> {
    submitter: S,
}

impl<S: Submitter> UploadCoordinator<S> {
    pub fn new(submitter: S) -> Self {
        Self { submitter }
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn upload_all(&self, manager: &CollectionManager) -> Result<UploadReport, UploadError> {
        let lock_path = manager.paths().upload_lock_path();
        let _cycle = match FileLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => lock,
            Ok(None) => return Err(UploadError::InProgress),
            Err(source) => {
                return Err(UploadError::Lock {
                    path: lock_path,
                    source,
                })
            }
        };

        let credential = manager.credential().load().map_err(|err| match err {
            CredentialError::Missing { path } => UploadError::MissingCredential { path },
            other => UploadError::Credential(other),
        })?;

        let attempted: Vec<CollectionKind> = CollectionKind::ALL
            .into_iter()
            .filter(|kind| manager.store(*kind).exists())
            .collect();
        let mut report = UploadReport {
            attempted: attempted.iter().copied().collect(),
            ..Default::default()
        };
        if attempted.is_empty() {
            log::info!("No collected features to upload");
            return Ok(report);
        }

        log::info!("Uploading {} collections", attempted.len());
        let bar = ProgressBar::new(attempted.len() as u64);
        // Collecting joins all submissions before anything is cleared.
        let results: Vec<(CollectionKind, Result<Vec<Feature>, CollectionUploadError>)> = attempted
            .par_iter()
            .map(|kind| {
                let result = self.upload_collection(manager, *kind, &credential);
                bar.inc(1);
                (*kind, result)
            })
            .collect();
        bar.finish_and_clear();

        let mut uploaded = BTreeMap::new();
        for (kind, result) in results {
            match result {
                Ok(features) => {
                    log::info!("Uploaded {} {} features", features.len(), kind);
                    report.succeeded.insert(kind);
                    uploaded.insert(kind, features);
                }
                Err(err) => {
                    log::warn!("Uploading {} collection failed: {}", kind, err);
                    report.failed.insert(kind, err);
                }
            }
        }

        if report.is_success() {
            report.invalidation = Some(manager.clear_uploaded(&uploaded));
        } else {
            log::warn!(
                "{} of {} uploads failed, keeping all collections for retry",
                report.num_failed(),
                report.attempted.len()
            );
        }
        Ok(report)
    }

    fn upload_collection(
        &self,
        manager: &CollectionManager,
        kind: CollectionKind,
        credential: &Credential,
    ) -> Result<Vec<Feature>, CollectionUploadError> {
        let mut collection = manager.store(kind).load()?;
        // Unstamped, to match against the file when clearing.
        let features = collection.features.clone();
        stamp_user_info(&mut collection, credential);
        self.submitter.submit(kind, &collection)?;
        Ok(features)
    }
}
