//! GPS stabilization and location averaging for field surveys of named places

pub mod config;
pub mod error;
pub mod fix_receiver;
pub mod geo;
pub mod records;
pub mod stabilizer;
pub mod storage;

pub use config::{AveragingMode, StabilizerConfig};
pub use error::{SResult, SurveyError};
pub use fix_receiver::{FixLog, RawFix};
pub use geo::{distance, initial_bearing, Coordinate};
pub use records::{PlaceRecord, PlaceRecords, VisitDistance, VisitRecord};
pub use stabilizer::{
    plot_scale, EngineState, PlotKind, PlotPoint, SnapshotReader, StabilitySnapshot,
    StabilizationEngine, StableLocation,
};
pub use storage::{JsonFilePlaceStore, MemoryPlaceStore, PlaceDocument, PlaceStore};
