use crate::error::{SResult, SurveyError};
use crate::fix_receiver::unix_now;
use crate::geo::{self, Coordinate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Label recorded when the device has not been named
pub const DEFAULT_DEVICE_LABEL: &str = "unknown";

static PLACE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate an opaque, process-unique place id
pub fn new_place_id() -> String {
    let seq = PLACE_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
    format!("place_{}_{}", Utc::now().timestamp_millis(), seq)
}

/// One GPS confirmation of a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub device_label: String,
    /// Unix seconds
    pub observed_at: f64,
    pub coordinate: Coordinate,
}

impl VisitRecord {
    pub fn new(device_label: &str, observed_at: f64, coordinate: Coordinate) -> Self {
        let device_label = if device_label.trim().is_empty() {
            DEFAULT_DEVICE_LABEL
        } else {
            device_label
        };
        Self {
            device_label: device_label.to_string(),
            observed_at,
            coordinate,
        }
    }

    /// Visit stamped with the current time
    pub fn now(device_label: &str, coordinate: Coordinate) -> Self {
        Self::new(device_label, unix_now(), coordinate)
    }
}

/// Distances of one visit, for the visit listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitDistance {
    pub index: usize,
    pub observed_at: f64,
    pub device_label: String,
    pub to_founding_meters: f64,
    /// `None` while the stabilizer has no mean location
    pub to_mean_meters: Option<f64>,
}

/// Named, saved location with at least one visit.
///
/// Only serialized, never deserialized directly: restoring goes through
/// [`crate::storage::PlaceDocument`] so the non-empty visit list is checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceRecord {
    id: String,
    name: String,
    visits: Vec<VisitRecord>,
    /// Blob-store reference of the uploaded picture, once there is one
    picture_url: Option<String>,
    #[serde(skip)]
    images: Vec<Vec<u8>>,
}

impl PlaceRecord {
    /// New place founded by `founding` under a freshly generated id
    pub fn new(name: &str, founding: VisitRecord) -> SResult<Self> {
        Self::with_id(&new_place_id(), name, founding)
    }

    /// Place with a known id, e.g. when restoring from a store
    pub fn with_id(id: &str, name: &str, founding: VisitRecord) -> SResult<Self> {
        if name.trim().is_empty() {
            return Err(SurveyError::EmptyName);
        }
        if !founding.coordinate.is_valid() {
            return Err(SurveyError::InvalidCoordinate(format!(
                "founding visit of '{}' at ({}, {})",
                name, founding.coordinate.latitude, founding.coordinate.longitude
            )));
        }
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            visits: vec![founding],
            picture_url: None,
            images: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Visits in insertion order; index 0 is the founding visit
    pub fn visits(&self) -> &[VisitRecord] {
        &self.visits
    }

    pub fn founding_visit(&self) -> &VisitRecord {
        // never empty: construction requires a founding visit and index 0 cannot be removed
        &self.visits[0]
    }

    /// Visits sorted by `observed_at` ascending, for display
    pub fn visits_by_time(&self) -> Vec<&VisitRecord> {
        let mut sorted: Vec<&VisitRecord> = self.visits.iter().collect();
        sorted.sort_by(|a, b| a.observed_at.total_cmp(&b.observed_at));
        sorted
    }

    pub fn add_visit(&mut self, visit: VisitRecord) -> SResult<()> {
        if !visit.coordinate.is_valid() {
            return Err(SurveyError::InvalidCoordinate(format!(
                "visit to '{}' at ({}, {})",
                self.name, visit.coordinate.latitude, visit.coordinate.longitude
            )));
        }
        self.visits.push(visit);
        Ok(())
    }

    /// Remove the visit at `index` (insertion order). The founding visit is protected.
    pub fn delete_visit(&mut self, index: usize) -> SResult<VisitRecord> {
        if index == 0 {
            return Err(SurveyError::ProtectedVisit);
        }
        if index >= self.visits.len() {
            return Err(SurveyError::VisitNotFound(index));
        }
        Ok(self.visits.remove(index))
    }

    pub fn picture_url(&self) -> Option<&str> {
        self.picture_url.as_deref()
    }

    pub fn set_picture_url(&mut self, url: Option<String>) {
        self.picture_url = url;
    }

    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    pub fn attach_image(&mut self, bytes: Vec<u8>) {
        self.images.push(bytes);
    }

    pub fn remove_image(&mut self, index: usize) -> SResult<Vec<u8>> {
        if index >= self.images.len() {
            return Err(SurveyError::ImageNotFound(index));
        }
        Ok(self.images.remove(index))
    }

    /// Meters from the founding visit to `coordinate`
    pub fn distance_to(&self, coordinate: &Coordinate) -> f64 {
        geo::distance(&self.founding_visit().coordinate, coordinate)
    }

    /// Compass rotation pointing an observer at `observer` towards the founding visit
    pub fn bearing_from(&self, observer: &Coordinate) -> f64 {
        geo::initial_bearing(observer, &self.founding_visit().coordinate)
    }

    /// Per-visit distances to the founding visit and, when available, to `mean`
    pub fn visit_distances(&self, mean: Option<Coordinate>) -> Vec<VisitDistance> {
        let founding = self.founding_visit().coordinate;
        self.visits
            .iter()
            .enumerate()
            .map(|(index, visit)| VisitDistance {
                index,
                observed_at: visit.observed_at,
                device_label: visit.device_label.clone(),
                to_founding_meters: geo::distance(&founding, &visit.coordinate),
                to_mean_meters: mean.map(|m| geo::distance(&m, &visit.coordinate)),
            })
            .collect()
    }

    /// Name first, then founding time
    pub fn cmp_by_name(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name).then_with(|| {
            self.founding_visit()
                .observed_at
                .total_cmp(&other.founding_visit().observed_at)
        })
    }
}

/// In-memory collection of saved places, shared by presentation and persistence
#[derive(Debug, Clone, Default)]
pub struct PlaceRecords {
    places: Vec<PlaceRecord>,
}

impl PlaceRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_places(places: Vec<PlaceRecord>) -> Self {
        Self { places }
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaceRecord> {
        self.places.iter()
    }

    pub fn get(&self, id: &str) -> Option<&PlaceRecord> {
        self.places.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlaceRecord> {
        self.places.iter_mut().find(|p| p.id == id)
    }

    /// Places ordered by name, ties broken by founding time
    pub fn sorted(&self) -> Vec<&PlaceRecord> {
        let mut sorted: Vec<&PlaceRecord> = self.places.iter().collect();
        sorted.sort_by(|a, b| a.cmp_by_name(b));
        sorted
    }

    /// Insert a record, replacing any existing record with the same id
    pub fn add_place(&mut self, record: PlaceRecord) {
        log::info!("Saved place '{}' ({})", record.name, record.id);
        match self.places.iter_mut().find(|p| p.id == record.id) {
            Some(existing) => *existing = record,
            None => self.places.push(record),
        }
    }

    /// Found a new place at `coordinate`; usually the stabilizer's mean location
    pub fn create_place(
        &mut self,
        name: &str,
        device_label: &str,
        coordinate: Coordinate,
        observed_at: f64,
    ) -> SResult<&PlaceRecord> {
        let record = PlaceRecord::new(name, VisitRecord::new(device_label, observed_at, coordinate))?;
        let id = record.id.clone();
        self.add_place(record);
        self.get(&id)
            .ok_or_else(|| SurveyError::Internal(format!("place {} vanished after insert", id)))
    }

    pub fn add_visit(&mut self, place_id: &str, visit: VisitRecord) -> SResult<()> {
        let place = self
            .get_mut(place_id)
            .ok_or_else(|| SurveyError::PlaceNotFound(place_id.to_string()))?;
        place.add_visit(visit)?;
        log::info!(
            "Added visit #{} to '{}'",
            place.visits.len() - 1,
            place.name
        );
        Ok(())
    }

    pub fn delete_visit(&mut self, place_id: &str, index: usize) -> SResult<VisitRecord> {
        let place = self
            .get_mut(place_id)
            .ok_or_else(|| SurveyError::PlaceNotFound(place_id.to_string()))?;
        let removed = place.delete_visit(index)?;
        log::info!("Deleted visit #{} from '{}'", index, place.name);
        Ok(removed)
    }

    pub fn delete_place(&mut self, place_id: &str) -> SResult<PlaceRecord> {
        let position = self
            .places
            .iter()
            .position(|p| p.id == place_id)
            .ok_or_else(|| SurveyError::PlaceNotFound(place_id.to_string()))?;
        let removed = self.places.remove(position);
        log::info!("Deleted place '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }
}
