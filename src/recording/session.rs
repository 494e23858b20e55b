use geojson::Feature;
use thiserror::Error;

use super::view::{view_flags, ViewFlags};
use crate::{
    collection::{
        kind::{CollectionKind, GeometryKind},
        manager::CollectionManager,
    },
    geofile::{
        feature::{feature_from_geometry, Properties},
        feature_store::StoreError,
    },
};

/// Fixes must be more accurate than this many metres unless the user confirms them.
pub const DEFAULT_MAX_HORIZONTAL_ACCURACY: f64 = 11.0;

const MIN_POLYGON_VERTICES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub longitude: f64,
    pub latitude: f64,
    /// Metres.
    pub horizontal_accuracy: f64,
}

impl LocationFix {
    pub fn new(longitude: f64, latitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            longitude,
            latitude,
            horizontal_accuracy,
        }
    }

    fn coord(&self) -> geo::Coord {
        geo::Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    /// The geometry is complete and can be committed.
    Ready,
    Committed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("horizontal accuracy of {accuracy} m is not better than {threshold} m")]
    LowAccuracy { accuracy: f64, threshold: f64 },
    #[error("cannot {action} while the recording is {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
    #[error("a polygon needs at least 3 vertices, got {count}")]
    TooFewVertices { count: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Captures the fixes of one marker and turns them into a feature once the geometry is complete.
///
/// Points are ready after one fix, lines after their start and end fix, polygons once closed
/// with at least three vertices. Only a ready recording can be committed to its collection.
#[derive(Debug)]
pub struct RecordingSession {
    kind: CollectionKind,
    geometry_kind: GeometryKind,
    max_horizontal_accuracy: f64,
    state: SessionState,
    fixes: Vec<LocationFix>,
}

impl RecordingSession {
    pub fn new(kind: CollectionKind) -> Self {
        Self::with_geometry(kind, kind.default_geometry())
    }

    pub fn with_geometry(kind: CollectionKind, geometry_kind: GeometryKind) -> Self {
        Self {
            kind,
            geometry_kind,
            max_horizontal_accuracy: DEFAULT_MAX_HORIZONTAL_ACCURACY,
            state: SessionState::Idle,
            fixes: Vec::new(),
        }
    }

    pub fn with_max_horizontal_accuracy(mut self, meters: f64) -> Self {
        self.max_horizontal_accuracy = meters;
        self
    }

    pub fn geometry_kind(&self) -> GeometryKind {
        self.geometry_kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fixes(&self) -> &[LocationFix] {
        &self.fixes
    }

    pub fn view_flags(&self) -> ViewFlags {
        view_flags(self.geometry_kind, self.state, self.fixes.len())
    }

    /// Record a fix, refusing it when it is not accurate enough. The caller may ask the user and
    /// record it anyway with [`RecordingSession::capture_anyway`].
    pub fn capture(&mut self, fix: LocationFix) -> Result<SessionState, SessionError> {
        self.ensure_capturing("capture a location")?;
        if !(fix.horizontal_accuracy < self.max_horizontal_accuracy) {
            return Err(SessionError::LowAccuracy {
                accuracy: fix.horizontal_accuracy,
                threshold: self.max_horizontal_accuracy,
            });
        }
        self.capture_anyway(fix)
    }

    pub fn capture_anyway(&mut self, fix: LocationFix) -> Result<SessionState, SessionError> {
        self.ensure_capturing("capture a location")?;
        self.fixes.push(fix);
        self.state = match self.geometry_kind {
            GeometryKind::Point => SessionState::Ready,
            GeometryKind::LineString if self.fixes.len() == 2 => SessionState::Ready,
            GeometryKind::LineString | GeometryKind::Polygon => SessionState::Capturing,
        };
        log::debug!(
            "Captured ({}, {}) +/- {} m for {}, now {:?}",
            fix.longitude,
            fix.latitude,
            fix.horizontal_accuracy,
            self.kind,
            self.state
        );
        Ok(self.state)
    }

    /// Close the ring of a polygon recording.
    pub fn close(&mut self) -> Result<SessionState, SessionError> {
        if self.geometry_kind != GeometryKind::Polygon || self.state != SessionState::Capturing {
            return Err(SessionError::InvalidState {
                action: "close the polygon",
                state: self.state,
            });
        }
        if self.fixes.len() < MIN_POLYGON_VERTICES {
            return Err(SessionError::TooFewVertices {
                count: self.fixes.len(),
            });
        }
        self.state = SessionState::Ready;
        Ok(self.state)
    }

    /// The completed feature, `None` until the recording is ready.
    pub fn candidate(&self) -> Option<Feature> {
        if self.state != SessionState::Ready {
            return None;
        }
        let coords: Vec<geo::Coord> = self.fixes.iter().map(LocationFix::coord).collect();
        let geometry = match self.geometry_kind {
            GeometryKind::Point => geo::Geometry::Point(geo::Point::from(*coords.first()?)),
            GeometryKind::LineString => geo::Geometry::LineString(geo::LineString::new(coords)),
            GeometryKind::Polygon => geo::Geometry::Polygon(geo::Polygon::new(
                geo::LineString::new(coords),
                Vec::new(),
            )),
        };
        Some(feature_from_geometry(&geometry))
    }

    /// Append the ready feature to its collection. If saving fails the recording stays ready so
    /// it can be committed again.
    pub fn commit(
        &mut self,
        manager: &CollectionManager,
        properties: Properties,
    ) -> Result<(), SessionError> {
        let Some(feature) = self.candidate() else {
            return Err(SessionError::InvalidState {
                action: "save",
                state: self.state,
            });
        };
        manager.append_feature(self.kind, feature, properties)?;
        self.state = SessionState::Committed;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Committed | SessionState::Cancelled => Err(SessionError::InvalidState {
                action: "cancel",
                state: self.state,
            }),
            _ => {
                self.state = SessionState::Cancelled;
                self.fixes.clear();
                Ok(())
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.fixes.clear();
    }

    fn ensure_capturing(&self, action: &'static str) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Capturing => Ok(()),
            state => Err(SessionError::InvalidState { action, state }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use approx::assert_abs_diff_eq;
    use geojson::{JsonObject, JsonValue};
    use rstest::{fixture, rstest};
    use serde_json::json;
    use testdir::testdir;

    use super::{LocationFix, RecordingSession, SessionError, SessionState};
    use crate::collection::{
        kind::{CollectionKind, GeometryKind},
        manager::CollectionManager,
        paths::StoragePaths,
    };

    #[fixture]
    fn manager() -> CollectionManager {
        CollectionManager::new(StoragePaths::new(testdir!()))
    }

    fn surface_concrete() -> JsonObject {
        match json!({"surface": "concrete"}) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[rstest]
    fn test_line_recording_flow(manager: CollectionManager) {
        let mut session = RecordingSession::new(CollectionKind::Sidewalk);
        assert_eq!(GeometryKind::LineString, session.geometry_kind());
        assert!(session.candidate().is_none());

        assert_eq!(
            SessionState::Capturing,
            session
                .capture(LocationFix::new(-122.31, 47.65, 4.0))
                .unwrap()
        );
        assert!(session.candidate().is_none());
        assert!(session.view_flags().next.enabled);
        assert!(!session.view_flags().save_enabled);
        assert_eq!(
            SessionState::Ready,
            session
                .capture(LocationFix::new(-122.30, 47.66, 5.0))
                .unwrap()
        );

        assert!(session.view_flags().save_enabled);
        session.commit(&manager, surface_concrete()).unwrap();
        assert_eq!(SessionState::Committed, session.state());

        let collection = manager.store(CollectionKind::Sidewalk).load().unwrap();
        assert_eq!(1, collection.features.len());
        let stored = serde_json::to_value(&collection.features[0]).unwrap();
        assert_eq!(
            stored["geometry"],
            json!({"type": "LineString", "coordinates": [[-122.31, 47.65], [-122.30, 47.66]]})
        );
        assert_eq!(stored["properties"], json!({"surface": "concrete"}));
    }

    #[rstest]
    fn test_point_recording_is_ready_after_one_fix() {
        let mut session = RecordingSession::new(CollectionKind::CurbRamp);
        session.capture(LocationFix::new(-122.3, 47.6, 3.0)).unwrap();
        assert_eq!(SessionState::Ready, session.state());

        let geometry = session.candidate().unwrap().geometry.unwrap();
        match geometry.value {
            geojson::Value::Point(position) => {
                assert_abs_diff_eq!(-122.3, position[0]);
                assert_abs_diff_eq!(47.6, position[1]);
            }
            other => panic!("expected a point, got {:?}", other),
        }
    }

    #[rstest]
    fn test_polygon_ring_is_closed() {
        let mut session =
            RecordingSession::with_geometry(CollectionKind::Crossing, GeometryKind::Polygon);
        session.capture(LocationFix::new(0.0, 0.0, 1.0)).unwrap();
        session.capture(LocationFix::new(1.0, 0.0, 1.0)).unwrap();
        assert!(matches!(
            session.close(),
            Err(SessionError::TooFewVertices { count: 2 })
        ));
        session.capture(LocationFix::new(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(SessionState::Ready, session.close().unwrap());

        let geometry = session.candidate().unwrap().geometry.unwrap();
        assert_eq!(
            geojson::Value::Polygon(vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 0.0],
            ]]),
            geometry.value
        );
    }

    #[rstest]
    #[case(11.0)]
    #[case(25.5)]
    fn test_inaccurate_fix_needs_confirmation(#[case] accuracy: f64) {
        let mut session = RecordingSession::new(CollectionKind::CurbRamp);
        assert!(matches!(
            session.capture(LocationFix::new(-122.3, 47.6, accuracy)),
            Err(SessionError::LowAccuracy { .. })
        ));
        assert_eq!(SessionState::Idle, session.state());

        session
            .capture_anyway(LocationFix::new(-122.3, 47.6, accuracy))
            .unwrap();
        assert_eq!(SessionState::Ready, session.state());
    }

    #[rstest]
    fn test_custom_accuracy_threshold() {
        let mut session =
            RecordingSession::new(CollectionKind::CurbRamp).with_max_horizontal_accuracy(30.0);
        session.capture(LocationFix::new(-122.3, 47.6, 25.5)).unwrap();
        assert_eq!(SessionState::Ready, session.state());
    }

    #[rstest]
    fn test_commit_before_ready_is_refused(manager: CollectionManager) {
        let mut session = RecordingSession::new(CollectionKind::Sidewalk);
        session.capture(LocationFix::new(-122.3, 47.6, 3.0)).unwrap();
        assert!(matches!(
            session.commit(&manager, JsonObject::new()),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(manager.is_empty(CollectionKind::Sidewalk));
    }

    #[rstest]
    fn test_failed_commit_keeps_recording(manager: CollectionManager) {
        let path = manager.paths().collection_path(CollectionKind::CurbRamp);
        fs::write(&path, "corrupt").unwrap();
        let mut session = RecordingSession::new(CollectionKind::CurbRamp);
        session.capture(LocationFix::new(-122.3, 47.6, 3.0)).unwrap();

        assert!(matches!(
            session.commit(&manager, JsonObject::new()),
            Err(SessionError::Store(_))
        ));
        assert_eq!(SessionState::Ready, session.state());

        fs::remove_file(&path).unwrap();
        session.commit(&manager, JsonObject::new()).unwrap();
        assert_eq!(1, manager.store(CollectionKind::CurbRamp).len().unwrap());
    }

    #[rstest]
    fn test_cancel_discards_recording(manager: CollectionManager) {
        let mut session = RecordingSession::new(CollectionKind::Sidewalk);
        session.capture(LocationFix::new(-122.3, 47.6, 3.0)).unwrap();
        session.cancel().unwrap();

        assert_eq!(SessionState::Cancelled, session.state());
        assert!(session.fixes().is_empty());
        assert!(session.capture(LocationFix::new(-122.3, 47.6, 3.0)).is_err());
        assert!(session.commit(&manager, JsonObject::new()).is_err());
        assert!(manager.is_empty(CollectionKind::Sidewalk));

        session.reset();
        assert_eq!(SessionState::Idle, session.state());
        session.capture(LocationFix::new(-122.3, 47.6, 3.0)).unwrap();
    }
}
