use std::collections::{BTreeMap, BTreeSet};

use geojson::Feature;

use super::{
    credential::CredentialStore,
    kind::CollectionKind,
    paths::StoragePaths,
};
use crate::geofile::{
    feature::Properties,
    feature_store::{FeatureStore, StoreError},
};

#[derive(Debug, Default)]
pub struct InvalidationReport {
    pub cleared: BTreeSet<CollectionKind>,
    /// Features appended while an upload was running, still waiting for the next one.
    pub retained: BTreeMap<CollectionKind, usize>,
    pub failed: BTreeMap<CollectionKind, StoreError>,
}

impl InvalidationReport {
    pub fn num_cleared(&self) -> usize {
        self.cleared.len()
    }

    pub fn num_failed(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct CollectionStatus {
    pub kind: CollectionKind,
    pub num_features: Result<usize, StoreError>,
}

#[derive(Debug)]
pub struct CollectionManager {
    paths: StoragePaths,
    stores: BTreeMap<CollectionKind, FeatureStore>,
    credential: CredentialStore,
}

impl CollectionManager {
    pub fn new(paths: StoragePaths) -> Self {
        let stores = CollectionKind::ALL
            .into_iter()
            .map(|kind| (kind, FeatureStore::new(paths.collection_path(kind))))
            .collect();
        let credential = CredentialStore::new(paths.credential_path());
        Self {
            paths,
            stores,
            credential,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn store(&self, kind: CollectionKind) -> &FeatureStore {
        // Every kind gets a store in `new`.
        &self.stores[&kind]
    }

    pub fn credential(&self) -> &CredentialStore {
        &self.credential
    }

    pub fn append_feature(
        &self,
        kind: CollectionKind,
        feature: Feature,
        properties: Properties,
    ) -> Result<(), StoreError> {
        self.store(kind).append(feature, properties)?;
        log::info!("Saved {} feature", kind);
        Ok(())
    }

    pub fn is_empty(&self, kind: CollectionKind) -> bool {
        !self.store(kind).exists()
    }

    /// Delete the files of all `targets`. Every target is attempted, a missing file counts as
    /// cleared.
    pub fn invalidate(&self, targets: &BTreeSet<CollectionKind>) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for kind in targets {
            match self.store(*kind).invalidate() {
                Ok(()) => {
                    report.cleared.insert(*kind);
                }
                Err(err) => {
                    log::warn!("Could not clear {} collection: {}", kind, err);
                    report.failed.insert(*kind, err);
                }
            }
        }
        report
    }

    /// Remove the `uploaded` features from the front of each collection. Features appended after
    /// the upload loaded the collection stay for the next upload.
    pub fn clear_uploaded(
        &self,
        uploaded: &BTreeMap<CollectionKind, Vec<Feature>>,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for (kind, features) in uploaded {
            match self.store(*kind).remove_uploaded(features) {
                Ok(remaining) => {
                    report.cleared.insert(*kind);
                    if remaining > 0 {
                        report.retained.insert(*kind, remaining);
                    }
                }
                Err(err) => {
                    log::warn!("Could not clear uploaded {} features: {}", kind, err);
                    report.failed.insert(*kind, err);
                }
            }
        }
        report
    }

    pub fn status(&self) -> Vec<CollectionStatus> {
        CollectionKind::ALL
            .into_iter()
            .map(|kind| CollectionStatus {
                kind,
                num_features: self.store(kind).len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, BTreeSet},
        fs,
    };

    use geojson::JsonObject;
    use rstest::{fixture, rstest};
    use testdir::testdir;

    use super::CollectionManager;
    use crate::{
        collection::{kind::CollectionKind, paths::StoragePaths},
        geofile::{feature::feature_from_geometry, feature_store::StoreError},
    };

    #[fixture]
    fn manager() -> CollectionManager {
        CollectionManager::new(StoragePaths::new(testdir!()))
    }

    fn add_point(manager: &CollectionManager, kind: CollectionKind) {
        let feature = feature_from_geometry(&geo::Geometry::Point(geo::Point::new(-122.3, 47.6)));
        manager
            .append_feature(kind, feature, JsonObject::new())
            .unwrap();
    }

    #[rstest]
    fn test_append_goes_to_selected_collection(manager: CollectionManager) {
        add_point(&manager, CollectionKind::CurbRamp);
        assert!(!manager.is_empty(CollectionKind::CurbRamp));
        assert!(manager.is_empty(CollectionKind::Sidewalk));
        assert!(manager.is_empty(CollectionKind::Crossing));
    }

    #[rstest]
    fn test_invalidate_only_targets(manager: CollectionManager) {
        for kind in CollectionKind::ALL {
            add_point(&manager, kind);
        }

        let targets = BTreeSet::from([CollectionKind::Sidewalk, CollectionKind::Crossing]);
        let report = manager.invalidate(&targets);

        assert!(report.is_success());
        assert_eq!(2, report.num_cleared());
        assert!(manager.is_empty(CollectionKind::Sidewalk));
        assert!(manager.is_empty(CollectionKind::Crossing));
        assert!(!manager.is_empty(CollectionKind::CurbRamp));
    }

    #[rstest]
    fn test_invalidate_missing_files_counts_as_cleared(manager: CollectionManager) {
        let targets = CollectionKind::ALL.into_iter().collect();
        let report = manager.invalidate(&targets);
        assert_eq!(3, report.num_cleared());
        assert_eq!(0, report.num_failed());
    }

    #[rstest]
    fn test_invalidate_reports_delete_failure_and_continues(manager: CollectionManager) {
        // A directory in place of the collection file cannot be removed with `remove_file`.
        fs::create_dir_all(manager.paths().collection_path(CollectionKind::Sidewalk)).unwrap();
        add_point(&manager, CollectionKind::Crossing);

        let targets = BTreeSet::from([CollectionKind::Sidewalk, CollectionKind::Crossing]);
        let report = manager.invalidate(&targets);

        assert!(!report.is_success());
        assert!(matches!(
            report.failed.get(&CollectionKind::Sidewalk),
            Some(StoreError::Delete { .. })
        ));
        assert!(report.cleared.contains(&CollectionKind::Crossing));
        assert!(manager.is_empty(CollectionKind::Crossing));
    }

    #[rstest]
    fn test_status_counts_features(manager: CollectionManager) {
        add_point(&manager, CollectionKind::Sidewalk);
        add_point(&manager, CollectionKind::Sidewalk);
        fs::write(
            manager.paths().collection_path(CollectionKind::Crossing),
            "garbage",
        )
        .unwrap();

        let status = manager.status();
        assert_eq!(3, status.len());
        assert_eq!(2, *status[0].num_features.as_ref().unwrap());
        assert_eq!(0, *status[1].num_features.as_ref().unwrap());
        assert!(matches!(
            status[2].num_features,
            Err(StoreError::CorruptData { .. })
        ));
    }

    #[rstest]
    fn test_clear_uploaded_retains_later_features(manager: CollectionManager) {
        add_point(&manager, CollectionKind::Sidewalk);
        add_point(&manager, CollectionKind::Crossing);
        let uploaded: BTreeMap<_, _> = [CollectionKind::Sidewalk, CollectionKind::Crossing]
            .into_iter()
            .map(|kind| (kind, manager.store(kind).load().unwrap().features))
            .collect();
        add_point(&manager, CollectionKind::Sidewalk);

        let report = manager.clear_uploaded(&uploaded);

        assert!(report.is_success());
        assert_eq!(2, report.num_cleared());
        assert_eq!(BTreeMap::from([(CollectionKind::Sidewalk, 1)]), report.retained);
        assert_eq!(1, manager.store(CollectionKind::Sidewalk).len().unwrap());
        assert!(manager.is_empty(CollectionKind::Crossing));
    }
}
