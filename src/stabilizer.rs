//! GPS stabilization engine.
//!
//! Consumes raw fixes one at a time, counts runs of consecutive near-duplicate
//! fixes, and records a stable point each time a run reaches the configured
//! length. Stable points are averaged into a mean location. Every `ingest` and
//! `reset` ends by publishing an immutable [`StabilitySnapshot`] that readers on
//! other threads pick up through a [`SnapshotReader`].
use crate::config::{AveragingMode, StabilizerConfig};
use crate::error::{SResult, SurveyError};
use crate::fix_receiver::RawFix;
use crate::geo::{self, Coordinate};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Status line published after a reset
pub const RESET_STATUS: &str = "Reset Location Manager";

/// Coordinate accepted as stationary after a qualifying run of fixes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StableLocation {
    pub coordinate: Coordinate,
    pub sequence_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlotKind {
    Sample,
    Mean,
}

/// Stable point (or the mean) as a degree offset from the first stable point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub offset_lat: f64,
    pub offset_lng: f64,
    pub kind: PlotKind,
    pub distance_from_mean: f64,
}

/// Engine state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// No fix since construction or the last reset
    Idle,
    /// Fixes arriving, no stable point yet
    Accumulating,
    /// At least one stable point recorded
    Stable,
}

/// Everything presentation needs, published as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilitySnapshot {
    pub state: EngineState,
    pub is_stable: bool,
    pub mean_location: Option<Coordinate>,
    pub current_fix: Option<Coordinate>,
    pub plot_points: Vec<PlotPoint>,
    pub stable_point_count: usize,
    pub consecutive_stable_count: u32,
    pub fix_count: u64,
    pub last_delta_meters: Option<f64>,
    pub status_text: String,
}

impl StabilitySnapshot {
    fn empty(status_text: &str) -> Self {
        Self {
            state: EngineState::Idle,
            is_stable: false,
            mean_location: None,
            current_fix: None,
            plot_points: Vec::new(),
            stable_point_count: 0,
            consecutive_stable_count: 0,
            fix_count: 0,
            last_delta_meters: None,
            status_text: status_text.to_string(),
        }
    }
}

/// Read handle on the latest published snapshot; cheap to clone and `Send`
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cell: Arc<RwLock<Arc<StabilitySnapshot>>>,
}

impl SnapshotReader {
    /// Latest snapshot. Never a mix of two updates: snapshots are swapped whole.
    pub fn latest(&self) -> SResult<Arc<StabilitySnapshot>> {
        let guard = self.cell.read().map_err(|_| {
            SurveyError::Internal("Failed to acquire snapshot lock".to_string())
        })?;
        Ok(Arc::clone(&guard))
    }
}

/// Stabilization engine. Single writer: calls to `ingest` must be serialized
/// by the caller, which `&mut self` enforces.
pub struct StabilizationEngine {
    config: StabilizerConfig,
    current_fix: Option<Coordinate>,
    previous_fix: Option<Coordinate>,
    consecutive_stable_count: u32,
    stable_locations: Vec<StableLocation>,
    mean_location: Option<Coordinate>,
    plot_points: Vec<PlotPoint>,
    fix_count: u64,
    last_delta: Option<f64>,
    status_text: String,
    published: Arc<RwLock<Arc<StabilitySnapshot>>>,
}

impl StabilizationEngine {
    pub fn new() -> Self {
        Self::with_config_unchecked(StabilizerConfig::default())
    }

    pub fn with_config(config: StabilizerConfig) -> SResult<Self> {
        config.validate()?;
        Ok(Self::with_config_unchecked(config))
    }

    fn with_config_unchecked(config: StabilizerConfig) -> Self {
        log_averaging_mode(config.averaging);
        Self {
            config,
            current_fix: None,
            previous_fix: None,
            consecutive_stable_count: 0,
            stable_locations: Vec::new(),
            mean_location: None,
            plot_points: Vec::new(),
            fix_count: 0,
            last_delta: None,
            status_text: String::new(),
            published: Arc::new(RwLock::new(Arc::new(StabilitySnapshot::empty("")))),
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Replace the whole configuration; applies from the next `ingest`
    pub fn set_config(&mut self, config: StabilizerConfig) -> SResult<()> {
        if let Err(e) = config.validate() {
            log::warn!("Rejected stabilizer config {:?}: {}", config, e);
            return Err(e);
        }
        if config.averaging != self.config.averaging {
            log_averaging_mode(config.averaging);
        }
        log::info!("Stabilizer config updated: {:?}", config);
        self.config = config;
        Ok(())
    }

    /// Runtime-adjustable run length; applies from the next `ingest`
    pub fn set_required_stability_count(&mut self, count: u32) -> SResult<()> {
        if count == 0 {
            log::warn!("Rejected required stability count of 0");
            return Err(SurveyError::InvalidParameters(
                "required stability count must be at least 1".to_string(),
            ));
        }
        log::info!(
            "Required stability count {} -> {}",
            self.config.required_stability_count,
            count
        );
        self.config.required_stability_count = count;
        Ok(())
    }

    /// Handle to the published snapshots, for consumers on other threads
    pub fn subscribe(&self) -> SnapshotReader {
        SnapshotReader {
            cell: Arc::clone(&self.published),
        }
    }

    /// Feed one fix through the stabilizer and publish the resulting snapshot
    pub fn ingest(&mut self, fix: &RawFix) {
        self.previous_fix = self.current_fix;
        self.current_fix = Some(fix.coordinate);
        self.fix_count += 1;

        let delta = self
            .previous_fix
            .map(|prev| geo::distance(&prev, &fix.coordinate))
            .map(|d| if d.is_nan() { 0.0 } else { d });
        self.last_delta = delta;

        if let Some(delta) = delta {
            if delta < self.config.stability_distance_threshold_meters {
                self.consecutive_stable_count += 1;
            } else {
                // moved: no stable point may be recorded mid-transition
                log::debug!(
                    "Fix {} moved {:.2} m, run counter reset",
                    self.fix_count,
                    delta
                );
                self.consecutive_stable_count = 0;
                self.publish();
                return;
            }
        }

        log::debug!(
            "Fix {} delta {:?} consecutive {}",
            self.fix_count,
            delta,
            self.consecutive_stable_count
        );

        if self.consecutive_stable_count >= self.config.required_stability_count {
            let stable = StableLocation {
                coordinate: fix.coordinate,
                sequence_index: self.stable_locations.len(),
            };
            log::info!(
                "Stable point #{} at ({:.6}, {:.6})",
                stable.sequence_index,
                stable.coordinate.latitude,
                stable.coordinate.longitude
            );
            self.stable_locations.push(stable);
            self.consecutive_stable_count = 0;
        }

        self.mean_location = self.compute_mean();
        self.plot_points = self.compute_plot_points();
        self.publish();
    }

    /// Drop all state and start a fresh survey
    pub fn reset(&mut self) {
        self.current_fix = None;
        self.previous_fix = None;
        self.consecutive_stable_count = 0;
        self.stable_locations.clear();
        self.mean_location = None;
        self.plot_points.clear();
        self.fix_count = 0;
        self.last_delta = None;
        self.status_text = RESET_STATUS.to_string();

        log::info!("Location manager reset");
        self.swap_snapshot(StabilitySnapshot::empty(RESET_STATUS));
    }

    /// Best estimate of the surveyed place; `None` until a stable point exists
    pub fn mean_location(&self) -> Option<Coordinate> {
        self.mean_location
    }

    pub fn is_stable(&self) -> bool {
        !self.stable_locations.is_empty()
    }

    pub fn state(&self) -> EngineState {
        if self.is_stable() {
            EngineState::Stable
        } else if self.current_fix.is_some() {
            EngineState::Accumulating
        } else {
            EngineState::Idle
        }
    }

    pub fn current_fix(&self) -> Option<Coordinate> {
        self.current_fix
    }

    pub fn stable_locations(&self) -> &[StableLocation] {
        &self.stable_locations
    }

    pub fn plot_points(&self) -> &[PlotPoint] {
        &self.plot_points
    }

    pub fn consecutive_stable_count(&self) -> u32 {
        self.consecutive_stable_count
    }

    pub fn fix_count(&self) -> u64 {
        self.fix_count
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Distance from the mean location to `target`, if a mean exists
    pub fn distance_from_mean(&self, target: &Coordinate) -> Option<f64> {
        self.mean_location.map(|mean| geo::distance(&mean, target))
    }

    /// Snapshot of the current state, built fresh
    pub fn snapshot(&self) -> StabilitySnapshot {
        StabilitySnapshot {
            state: self.state(),
            is_stable: self.is_stable(),
            mean_location: self.mean_location,
            current_fix: self.current_fix,
            plot_points: self.plot_points.clone(),
            stable_point_count: self.stable_locations.len(),
            consecutive_stable_count: self.consecutive_stable_count,
            fix_count: self.fix_count,
            last_delta_meters: self.last_delta,
            status_text: self.status_text.clone(),
        }
    }

    fn compute_mean(&self) -> Option<Coordinate> {
        let points: Vec<Coordinate> = self.stable_locations.iter().map(|s| s.coordinate).collect();
        match self.config.averaging {
            AveragingMode::Planar => geo::planar_mean(&points),
            AveragingMode::Spherical => geo::spherical_centroid(&points).or_else(|| {
                log::warn!("Stable points cancel out on the sphere, using planar mean");
                geo::planar_mean(&points)
            }),
        }
    }

    fn compute_plot_points(&self) -> Vec<PlotPoint> {
        let (origin, mean) = match (self.stable_locations.first(), self.mean_location) {
            (Some(first), Some(mean)) => (first.coordinate, mean),
            _ => return Vec::new(),
        };

        let mut points: Vec<PlotPoint> = self
            .stable_locations
            .iter()
            .map(|s| PlotPoint {
                offset_lat: s.coordinate.latitude - origin.latitude,
                offset_lng: s.coordinate.longitude - origin.longitude,
                kind: PlotKind::Sample,
                distance_from_mean: geo::distance(&s.coordinate, &mean),
            })
            .collect();

        points.push(PlotPoint {
            offset_lat: mean.latitude - origin.latitude,
            offset_lng: mean.longitude - origin.longitude,
            kind: PlotKind::Mean,
            distance_from_mean: 0.0,
        });

        points
    }

    fn format_status(&self) -> String {
        let delta = self
            .last_delta
            .map(|d| format!("{:.1}", d))
            .unwrap_or_default();
        let mut status = format!(
            "Count:{} Delta:{} Consec:{} Points:{}",
            self.fix_count,
            delta,
            self.consecutive_stable_count,
            self.stable_locations.len()
        );

        if let (Some(current), Some(mean)) = (self.current_fix, self.mean_location) {
            status.push_str(&format!(" MeanDist:{:.1}", geo::distance(&current, &mean)));
        }
        if let Some(current) = self.current_fix {
            status.push_str(&format!(
                "\nCurrent:{:.4}, {:.4}",
                current.latitude, current.longitude
            ));
        }
        status
    }

    fn publish(&mut self) {
        self.status_text = self.format_status();
        let snapshot = self.snapshot();
        self.swap_snapshot(snapshot);
    }

    fn swap_snapshot(&self, snapshot: StabilitySnapshot) {
        let next = Arc::new(snapshot);
        // a poisoned cell still holds a whole snapshot, so overwrite it anyway
        let mut guard = self
            .published
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
    }
}

impl Default for StabilizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn log_averaging_mode(mode: AveragingMode) {
    match mode {
        AveragingMode::Planar => log::debug!(
            "Mean location uses planar degree averaging (small-area approximation, not valid near poles or the antimeridian)"
        ),
        AveragingMode::Spherical => log::info!("Mean location uses spherical centroid averaging"),
    }
}

/// Pixels per degree that fits every plot point into a square of `dimension`
/// pixels centered on the first stable point, with a 20% margin.
///
/// Returns 0 while there is at most one stable point, since nothing needs scaling.
pub fn plot_scale(points: &[PlotPoint], dimension: f64) -> f64 {
    let samples = points.iter().filter(|p| p.kind == PlotKind::Sample).count();
    if samples <= 1 {
        return 0.0;
    }

    let max_offset = points
        .iter()
        .map(|p| p.offset_lat.abs().max(p.offset_lng.abs()))
        .fold(0.0_f64, f64::max);

    let scale = if max_offset == 0.0 {
        1.0
    } else {
        (dimension / 2.0) / max_offset
    };
    scale / 1.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fix(lat: f64, lng: f64) -> RawFix {
        RawFix::new(lat, lng, 0.0)
    }

    #[test]
    fn test_initial_state() {
        let engine = StabilizationEngine::new();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(!engine.is_stable());
        assert!(engine.mean_location().is_none());
        assert!(engine.plot_points().is_empty());
        assert_eq!(engine.config().required_stability_count, 4);
    }

    #[test]
    fn test_first_fix_does_not_count() {
        let mut engine = StabilizationEngine::new();
        engine.ingest(&fix(0.0, 0.0));
        assert_eq!(engine.consecutive_stable_count(), 0);
        assert_eq!(engine.state(), EngineState::Accumulating);
        assert!(engine.snapshot().last_delta_meters.is_none());
    }

    #[test]
    fn test_becomes_stable_exactly_at_threshold() {
        let mut engine = StabilizationEngine::new();
        engine.ingest(&fix(-41.27847, 174.76829));
        for i in 1..=3 {
            engine.ingest(&fix(-41.27847, 174.76829));
            assert_eq!(engine.consecutive_stable_count(), i);
            assert!(!engine.is_stable(), "stable too early at repeat {}", i);
        }
        engine.ingest(&fix(-41.27847, 174.76829));
        assert!(engine.is_stable());
        assert_eq!(engine.state(), EngineState::Stable);
        assert_eq!(engine.stable_locations().len(), 1);
        // counter starts over after each recorded point
        assert_eq!(engine.consecutive_stable_count(), 0);
    }

    #[test]
    fn test_movement_resets_run_without_appending() {
        let mut engine = StabilizationEngine::new();
        for _ in 0..4 {
            engine.ingest(&fix(0.0, 0.0));
        }
        assert_eq!(engine.consecutive_stable_count(), 3);

        // ~11 m east
        engine.ingest(&fix(0.0, 0.0001));
        assert_eq!(engine.consecutive_stable_count(), 0);
        assert!(engine.stable_locations().is_empty());
        assert!(!engine.is_stable());
    }

    #[test]
    fn test_delta_equal_to_threshold_is_movement() {
        let here = Coordinate::new(0.0, 0.0);
        let there = Coordinate::new(0.0, 0.0001);
        let config = StabilizerConfig {
            stability_distance_threshold_meters: geo::distance(&here, &there),
            required_stability_count: 1,
            ..StabilizerConfig::default()
        };
        let mut engine = StabilizationEngine::with_config(config).unwrap();

        engine.ingest(&fix(here.latitude, here.longitude));
        engine.ingest(&fix(there.latitude, there.longitude));
        assert_eq!(engine.consecutive_stable_count(), 0);
        assert!(engine.stable_locations().is_empty());
        assert!(!engine.is_stable());
    }

    #[test]
    fn test_required_count_change_applies_on_next_fix() {
        let mut engine = StabilizationEngine::new();
        engine.ingest(&fix(0.0, 0.0));
        engine.ingest(&fix(0.0, 0.0));
        engine.ingest(&fix(0.0, 0.0));
        assert!(!engine.is_stable());

        engine.set_required_stability_count(2).unwrap();
        assert!(!engine.is_stable());
        engine.ingest(&fix(0.0, 0.0));
        assert!(engine.is_stable());
    }

    #[test]
    fn test_zero_required_count_rejected() {
        let mut engine = StabilizationEngine::new();
        assert!(engine.set_required_stability_count(0).is_err());
        assert_eq!(engine.config().required_stability_count, 4);
    }

    #[test]
    fn test_single_stable_point_is_the_mean() {
        let mut engine = StabilizationEngine::with_config(StabilizerConfig {
            required_stability_count: 1,
            ..StabilizerConfig::default()
        })
        .unwrap();
        let spot = Coordinate::new(-39.88588889, 175.9621667);
        engine.ingest(&RawFix { coordinate: spot, received_at: 1.0 });
        engine.ingest(&RawFix { coordinate: spot, received_at: 2.0 });
        assert_eq!(engine.mean_location(), Some(spot));
    }

    #[test]
    fn test_mean_of_two_clusters() {
        let mut engine = StabilizationEngine::with_config(StabilizerConfig {
            required_stability_count: 2,
            ..StabilizerConfig::default()
        })
        .unwrap();
        for _ in 0..3 {
            engine.ingest(&fix(10.0, 20.0));
        }
        // second spot 0.000004 deg (~0.4 m) away, still within the threshold
        for _ in 0..2 {
            engine.ingest(&fix(10.000004, 20.000004));
        }
        assert_eq!(engine.stable_locations().len(), 2);
        let mean = engine.mean_location().unwrap();
        assert_abs_diff_eq!(mean.latitude, 10.000002, epsilon = 1e-12);
        assert_abs_diff_eq!(mean.longitude, 20.000002, epsilon = 1e-12);

        let points = engine.plot_points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].offset_lat, 0.0);
        assert_abs_diff_eq!(points[1].offset_lat, 0.000004, epsilon = 1e-12);
        assert_eq!(points[2].kind, PlotKind::Mean);
        assert_eq!(points[2].distance_from_mean, 0.0);
        for p in &points[..2] {
            assert!(p.distance_from_mean < 1.0);
        }
    }

    #[test]
    fn test_spherical_mode_matches_planar_for_small_cluster() {
        let config = StabilizerConfig {
            required_stability_count: 1,
            averaging: AveragingMode::Spherical,
            ..StabilizerConfig::default()
        };
        let mut engine = StabilizationEngine::with_config(config).unwrap();
        engine.ingest(&fix(-41.27847, 174.76829));
        engine.ingest(&fix(-41.27847, 174.76829));
        engine.ingest(&fix(-41.278474, 174.768294));
        let mean = engine.mean_location().unwrap();
        assert_abs_diff_eq!(mean.latitude, -41.278472, epsilon = 1e-7);
        assert_abs_diff_eq!(mean.longitude, 174.768292, epsilon = 1e-7);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = StabilizationEngine::new();
        for _ in 0..9 {
            engine.ingest(&fix(0.0, 0.0));
        }
        assert!(engine.is_stable());

        engine.reset();
        assert!(!engine.is_stable());
        assert!(engine.mean_location().is_none());
        assert!(engine.plot_points().is_empty());
        assert!(engine.current_fix().is_none());
        assert_eq!(engine.consecutive_stable_count(), 0);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.status_text(), RESET_STATUS);

        let published = engine.subscribe().latest().unwrap();
        assert!(!published.is_stable);
        assert!(published.plot_points.is_empty());
    }

    #[test]
    fn test_snapshot_published_on_every_fix() {
        let mut engine = StabilizationEngine::new();
        let reader = engine.subscribe();
        assert_eq!(reader.latest().unwrap().fix_count, 0);

        engine.ingest(&fix(0.0, 0.0));
        engine.ingest(&fix(0.0, 0.0001));
        let snap = reader.latest().unwrap();
        assert_eq!(snap.fix_count, 2);
        assert_abs_diff_eq!(snap.last_delta_meters.unwrap(), 11.12, epsilon = 0.01);
        assert!(snap.status_text.starts_with("Count:2 Delta:11.1 Consec:0 Points:0"));
        assert!(snap.status_text.contains("Current:0.0000, 0.0001"));
    }

    #[test]
    fn test_distance_from_mean_unavailable_until_stable() {
        let mut engine = StabilizationEngine::new();
        let target = Coordinate::new(0.0, 0.001);
        assert!(engine.distance_from_mean(&target).is_none());
        for _ in 0..5 {
            engine.ingest(&fix(0.0, 0.0));
        }
        assert_abs_diff_eq!(engine.distance_from_mean(&target).unwrap(), 111.19, epsilon = 0.01);
    }

    #[test]
    fn test_plot_scale() {
        let sample = |lat: f64, lng: f64| PlotPoint {
            offset_lat: lat,
            offset_lng: lng,
            kind: PlotKind::Sample,
            distance_from_mean: 0.0,
        };
        assert_eq!(plot_scale(&[sample(0.0, 0.0)], 300.0), 0.0);

        let coincident = [sample(0.0, 0.0), sample(0.0, 0.0)];
        assert_abs_diff_eq!(plot_scale(&coincident, 300.0), 1.0 / 1.2, epsilon = 1e-12);

        let spread = [sample(0.0, 0.0), sample(0.0001, -0.0002)];
        assert_abs_diff_eq!(plot_scale(&spread, 300.0), 150.0 / 0.0002 / 1.2, epsilon = 1e-6);
    }
}
