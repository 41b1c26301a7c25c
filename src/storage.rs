use crate::error::{SResult, SurveyError};
use crate::geo::Coordinate;
use crate::records::{PlaceRecord, PlaceRecords, VisitRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Visit sub-document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitDocument {
    pub device: String,
    /// Unix seconds
    pub datetime: f64,
    pub lat: f64,
    pub lng: f64,
}

impl From<&VisitRecord> for VisitDocument {
    fn from(visit: &VisitRecord) -> Self {
        VisitDocument {
            device: visit.device_label.clone(),
            datetime: visit.observed_at,
            lat: visit.coordinate.latitude,
            lng: visit.coordinate.longitude,
        }
    }
}

impl From<&VisitDocument> for VisitRecord {
    fn from(doc: &VisitDocument) -> Self {
        VisitRecord::new(&doc.device, doc.datetime, Coordinate::new(doc.lat, doc.lng))
    }
}

/// One document per place, keyed by the place id in the store.
///
/// Visits are a map from their position ("0", "1", ...) to the sub-document;
/// "0" is always the founding visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDocument {
    #[serde(rename = "locationName")]
    pub location_name: String,
    pub visits: BTreeMap<String, VisitDocument>,
    #[serde(rename = "pictureURL", default)]
    pub picture_url: Option<String>,
}

impl PlaceDocument {
    pub fn from_record(record: &PlaceRecord) -> Self {
        let visits = record
            .visits()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), VisitDocument::from(v)))
            .collect();

        PlaceDocument {
            location_name: record.name().to_string(),
            visits,
            picture_url: record.picture_url().map(str::to_string),
        }
    }

    /// Rebuild the record stored under `id`, restoring visits in position order
    pub fn into_record(&self, id: &str) -> SResult<PlaceRecord> {
        let mut numbered = Vec::with_capacity(self.visits.len());
        for (key, visit) in &self.visits {
            let position: usize = key.parse().map_err(|_| {
                SurveyError::Storage(format!("place {}: bad visit key '{}'", id, key))
            })?;
            numbered.push((position, visit));
        }
        // string keys sort "10" before "2"
        numbered.sort_by_key(|(position, _)| *position);

        let mut visits = numbered.into_iter().map(|(_, doc)| VisitRecord::from(doc));
        let founding = visits
            .next()
            .ok_or_else(|| SurveyError::Storage(format!("place {} has no visits", id)))?;

        let mut record = PlaceRecord::with_id(id, &self.location_name, founding)?;
        for visit in visits {
            record.add_visit(visit)?;
        }
        record.set_picture_url(self.picture_url.clone());
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Persistence collaborator for saved places
pub trait PlaceStore {
    /// Create or fully overwrite the document for `record`
    fn save(&mut self, record: &PlaceRecord) -> SResult<()>;

    /// Remove the document for `id`; removing an absent id is not an error
    fn delete(&mut self, id: &str) -> SResult<()>;

    /// Every restorable place. Malformed documents are skipped.
    fn load_all(&self) -> SResult<PlaceRecords>;
}

fn restore_all<'a, I>(documents: I) -> PlaceRecords
where
    I: IntoIterator<Item = (&'a String, &'a PlaceDocument)>,
{
    let mut records = PlaceRecords::new();
    let mut visit_count = 0;
    for (id, doc) in documents {
        match doc.into_record(id) {
            Ok(record) => {
                visit_count += record.visits().len();
                records.add_place(record);
            }
            Err(e) => log::warn!("Skipping place document {}: {}", id, e),
        }
    }
    log::info!(
        "Loaded {} locations, {} visits",
        records.len(),
        visit_count
    );
    records
}

/// Store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryPlaceStore {
    documents: HashMap<String, PlaceDocument>,
}

impl MemoryPlaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, id: &str) -> Option<&PlaceDocument> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl PlaceStore for MemoryPlaceStore {
    fn save(&mut self, record: &PlaceRecord) -> SResult<()> {
        self.documents
            .insert(record.id().to_string(), PlaceDocument::from_record(record));
        Ok(())
    }

    fn delete(&mut self, id: &str) -> SResult<()> {
        if self.documents.remove(id).is_none() {
            log::debug!("Delete of absent place {}", id);
        }
        Ok(())
    }

    fn load_all(&self) -> SResult<PlaceRecords> {
        Ok(restore_all(self.documents.iter()))
    }
}

/// Store holding the whole collection as one JSON object `{id: document}`
#[derive(Debug, Clone)]
pub struct JsonFilePlaceStore {
    path: PathBuf,
}

impl JsonFilePlaceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in the file, whether or not it parses as a place document
    fn read_raw(&self) -> SResult<BTreeMap<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn write_raw(&self, raw: &BTreeMap<String, serde_json::Value>) -> SResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(raw)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl PlaceStore for JsonFilePlaceStore {
    fn save(&mut self, record: &PlaceRecord) -> SResult<()> {
        let mut raw = self.read_raw()?;
        let document = serde_json::to_value(PlaceDocument::from_record(record))?;
        raw.insert(record.id().to_string(), document);
        self.write_raw(&raw)?;
        log::info!("Saved {} to {}", record.name(), self.path.display());
        Ok(())
    }

    fn delete(&mut self, id: &str) -> SResult<()> {
        let mut raw = self.read_raw()?;
        if raw.remove(id).is_some() {
            self.write_raw(&raw)?;
            log::info!("Deleted {} from {}", id, self.path.display());
        }
        Ok(())
    }

    /// Documents that do not parse are skipped here but left untouched on disk
    fn load_all(&self) -> SResult<PlaceRecords> {
        let mut documents = BTreeMap::new();
        for (id, value) in self.read_raw()? {
            match serde_json::from_value::<PlaceDocument>(value) {
                Ok(doc) => {
                    documents.insert(id, doc);
                }
                Err(e) => log::warn!("Skipping malformed place document {}: {}", id, e),
            }
        }
        Ok(restore_all(documents.iter()))
    }
}
