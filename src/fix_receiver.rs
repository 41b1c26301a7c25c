use crate::geo::Coordinate;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// GPS fix delivered by the location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Unix seconds; carried through to visit logging, never used by the stabilizer math
    #[serde(rename = "timestamp")]
    pub received_at: f64,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, received_at: f64) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            received_at,
        }
    }

    /// Fix stamped with the current wall-clock time
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, unix_now())
    }
}

/// Recorded stream of fixes, in arrival order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixLog {
    pub fixes: Vec<RawFix>,
}

impl FixLog {
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Number of fixes that violate the coordinate bounds
    pub fn out_of_range_count(&self) -> usize {
        self.fixes.iter().filter(|f| !f.coordinate.is_valid()).count()
    }
}

/// Current time as Unix seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Unix seconds to UTC, falling back to the epoch for unrepresentable values
pub fn to_datetime(timestamp: f64) -> DateTime<Utc> {
    let millis = (timestamp * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Short local-time label used in visit listings, e.g. `Mar-04 13:05`
pub fn format_timestamp(timestamp: f64) -> String {
    to_datetime(timestamp)
        .with_timezone(&Local)
        .format("%b-%d %H:%M")
        .to_string()
}
