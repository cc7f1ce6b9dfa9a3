//! Optimization pipeline: quality filters, then protected Douglas-Peucker.
//!
//! The stage order is fixed (accuracy, speed, time interval, simplification).
//! Statistics re-run each stage on the raw input in isolation, so they answer
//! "how many samples would this stage alone remove" and need not sum to the
//! overall reduction.

use std::str::FromStr;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::filters::{filter_by_accuracy, filter_by_speed, filter_by_time_interval};
use crate::geometry::trajectory_length;
use crate::simplify::{advanced_douglas_peucker, protected_indices};
use crate::Position;

/// Tolerances (meters) trial-run by [`analyze_tolerances`].
pub const TRIAL_TOLERANCES: [f64; 3] = [10.0, 25.0, 50.0];

/// Reduction (%) a trial tolerance must reach to be recommended.
const RECOMMENDED_MIN_REDUCTION: f64 = 60.0;

/// Approximate wire size of one position in a JSON response.
const BYTES_PER_POSITION_JSON: u64 = 150;

/// Approximate size of one stored position row.
const BYTES_PER_POSITION_STORED: u64 = 64;

// ============================================================================
// Options
// ============================================================================

/// Tuning for the optimization pipeline.
///
/// Every field is independently defaulted, so partial JSON or query strings
/// deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationOptions {
    /// Douglas-Peucker distance threshold in meters.
    /// Default: 10.0
    pub tolerance: f64,

    /// Speed (km/h) below which a sample counts as a stop.
    /// Default: 5.0
    pub min_speed: f64,

    /// Plausibility ceiling (km/h); faster samples are treated as GPS glitches.
    /// Default: 200.0
    pub max_speed: f64,

    /// Accuracy ceiling in meters; less accurate samples are dropped.
    /// Default: 100.0
    pub min_accuracy: f64,

    /// Minimum spacing between kept samples, in milliseconds.
    /// Default: 30000
    pub min_time_interval: i64,

    /// Never simplify away stops. When false, stops are dropped as noise.
    pub preserve_stops: bool,

    /// Never simplify away harsh acceleration or braking samples.
    pub preserve_speed_changes: bool,

    pub enable_accuracy_filter: bool,
    pub enable_speed_filter: bool,
    pub enable_time_filter: bool,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            tolerance: 10.0,
            min_speed: 5.0,
            max_speed: 200.0,
            min_accuracy: 100.0,
            min_time_interval: 30_000,
            preserve_stops: true,
            preserve_speed_changes: true,
            enable_accuracy_filter: true,
            enable_speed_filter: true,
            enable_time_filter: true,
        }
    }
}

impl OptimizationOptions {
    /// Light optimization for interactive map views.
    pub fn quick() -> Self {
        Self {
            tolerance: 10.0,
            min_speed: 5.0,
            min_time_interval: 30_000,
            preserve_stops: true,
            preserve_speed_changes: true,
            ..Self::default()
        }
    }

    /// Heavier optimization for long history windows.
    pub fn aggressive() -> Self {
        Self {
            tolerance: 25.0,
            min_speed: 10.0,
            min_time_interval: 60_000,
            preserve_stops: true,
            preserve_speed_changes: false,
            ..Self::default()
        }
    }

    /// Replace non-finite or negative values with their defaults.
    pub fn resolved(&self) -> Self {
        let defaults = Self::default();
        let pick = |value: f64, fallback: f64| {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                fallback
            }
        };

        Self {
            tolerance: pick(self.tolerance, defaults.tolerance),
            min_speed: pick(self.min_speed, defaults.min_speed),
            max_speed: pick(self.max_speed, defaults.max_speed),
            min_accuracy: pick(self.min_accuracy, defaults.min_accuracy),
            min_time_interval: if self.min_time_interval >= 0 {
                self.min_time_interval
            } else {
                defaults.min_time_interval
            },
            ..self.clone()
        }
    }
}

/// Named option sets layered on the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Quick,
    Aggressive,
}

impl Preset {
    pub fn options(self) -> OptimizationOptions {
        match self {
            Preset::Quick => OptimizationOptions::quick(),
            Preset::Aggressive => OptimizationOptions::aggressive(),
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Preset::Quick),
            "aggressive" => Ok(Preset::Aggressive),
            other => Err(format!("unknown preset '{}'", other)),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-stage diagnostics. Each count is what that stage alone removes from
/// the raw input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationStatistics {
    pub accuracy_filtered: usize,
    pub speed_filtered: usize,
    pub time_filtered: usize,
    pub simplifier_reduced: usize,
    /// Samples pinned as stops, speed changes or endpoints
    pub protected_points: usize,
    /// Path length of the raw trajectory in meters
    pub original_distance_m: f64,
    /// Path length of the optimized trajectory in meters
    pub optimized_distance_m: f64,
    pub processing_time_ms: f64,
}

/// Output of [`optimize_coordinates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub original_count: usize,
    pub optimized_count: usize,
    /// Percentage of samples removed (0-100, one decimal)
    pub reduction_percentage: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimized_positions: Vec<Position>,
    pub statistics: OptimizationStatistics,
    /// The resolved configuration actually applied
    pub options: OptimizationOptions,
}

impl OptimizationResult {
    /// Result for a trajectory returned as-is (optimization disabled or
    /// unavailable).
    pub fn passthrough(positions: Vec<Position>, options: &OptimizationOptions) -> Self {
        let distance = trajectory_length(&positions);
        let statistics = OptimizationStatistics {
            original_distance_m: distance,
            optimized_distance_m: distance,
            ..OptimizationStatistics::default()
        };
        Self {
            original_count: positions.len(),
            optimized_count: positions.len(),
            reduction_percentage: 0.0,
            optimized_positions: positions,
            statistics,
            options: options.resolved(),
        }
    }
}

/// `(original - optimized) / original * 100`, rounded to one decimal.
pub fn reduction_percentage(original: usize, optimized: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    let removed = original.saturating_sub(optimized) as f64;
    (removed / original as f64 * 1000.0).round() / 10.0
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the full optimization pipeline.
///
/// Filters run in accuracy, speed, time-interval order (each gated by its
/// `enable_*` flag), then [`advanced_douglas_peucker`] simplifies what is left.
///
/// # Example
/// ```rust
/// use trajectory_optimizer::{optimize_coordinates, OptimizationOptions};
///
/// let result = optimize_coordinates(&[], &OptimizationOptions::default());
/// assert_eq!(result.original_count, 0);
/// assert_eq!(result.reduction_percentage, 0.0);
/// ```
pub fn optimize_coordinates(positions: &[Position], options: &OptimizationOptions) -> OptimizationResult {
    let start = Instant::now();
    let options = options.resolved();
    let original_count = positions.len();

    let mut filtered = positions.to_vec();
    if options.enable_accuracy_filter {
        filtered = filter_by_accuracy(&filtered, options.min_accuracy);
    }
    if options.enable_speed_filter {
        filtered = filter_by_speed(&filtered, options.max_speed);
    }
    if options.enable_time_filter {
        filtered = filter_by_time_interval(&filtered, options.min_time_interval);
    }
    let filtered_count = filtered.len();

    let protected_points = protected_indices(&filtered, &options)
        .iter()
        .filter(|&&p| p)
        .count();
    let optimized = advanced_douglas_peucker(&filtered, &options);
    let optimized_count = optimized.len();

    let removed_by = |kept: usize| original_count.saturating_sub(kept);
    let statistics = OptimizationStatistics {
        accuracy_filtered: if options.enable_accuracy_filter {
            removed_by(filter_by_accuracy(positions, options.min_accuracy).len())
        } else {
            0
        },
        speed_filtered: if options.enable_speed_filter {
            removed_by(filter_by_speed(positions, options.max_speed).len())
        } else {
            0
        },
        time_filtered: if options.enable_time_filter {
            removed_by(filter_by_time_interval(positions, options.min_time_interval).len())
        } else {
            0
        },
        simplifier_reduced: removed_by(advanced_douglas_peucker(positions, &options).len()),
        protected_points,
        original_distance_m: trajectory_length(positions),
        optimized_distance_m: trajectory_length(&optimized),
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    let reduction = reduction_percentage(original_count, optimized_count);

    debug!(
        "[optimize_coordinates] {} -> {} filtered -> {} optimized ({:.1}% reduction, {} protected) in {:.2} ms",
        original_count,
        filtered_count,
        optimized_count,
        reduction,
        protected_points,
        statistics.processing_time_ms
    );

    OptimizationResult {
        original_count,
        optimized_count,
        reduction_percentage: reduction,
        optimized_positions: optimized,
        statistics,
        options,
    }
}

/// Optimize with [`OptimizationOptions::quick`].
pub fn quick_optimize(positions: &[Position]) -> OptimizationResult {
    optimize_coordinates(positions, &OptimizationOptions::quick())
}

/// Optimize with [`OptimizationOptions::aggressive`].
pub fn aggressive_optimize(positions: &[Position]) -> OptimizationResult {
    optimize_coordinates(positions, &OptimizationOptions::aggressive())
}

// ============================================================================
// Tolerance analysis
// ============================================================================

/// Outcome of optimizing at one trial tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceTrial {
    pub tolerance: f64,
    pub optimized_count: usize,
    pub reduction_percentage: f64,
    pub optimized_distance_m: f64,
}

/// Recommended tolerance and estimated savings for a raw trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceAnalysis {
    pub original_count: usize,
    pub original_distance_m: f64,
    pub trials: Vec<ToleranceTrial>,
    pub recommended_tolerance: f64,
    /// Response bytes saved per request at the recommended tolerance
    pub estimated_bandwidth_savings_bytes: u64,
    /// Storage bytes saved at the recommended tolerance
    pub estimated_storage_savings_bytes: u64,
    pub estimated_savings_percentage: f64,
}

fn run_trial(positions: &[Position], base: &OptimizationOptions, tolerance: f64) -> ToleranceTrial {
    let options = OptimizationOptions {
        tolerance,
        ..base.clone()
    };
    let result = optimize_coordinates(positions, &options);
    ToleranceTrial {
        tolerance,
        optimized_count: result.optimized_count,
        reduction_percentage: result.reduction_percentage,
        optimized_distance_m: result.statistics.optimized_distance_m,
    }
}

/// Trial-run the pipeline at 10, 25 and 50 m and recommend a tolerance.
///
/// The recommendation is the smallest trial tolerance that removes at least
/// 60% of the samples, or the largest trial tolerance when none does.
pub fn analyze_tolerances(positions: &[Position], options: &OptimizationOptions) -> ToleranceAnalysis {
    let base = options.resolved();

    #[cfg(feature = "parallel")]
    let trials: Vec<ToleranceTrial> = {
        use rayon::prelude::*;
        TRIAL_TOLERANCES
            .par_iter()
            .map(|&t| run_trial(positions, &base, t))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let trials: Vec<ToleranceTrial> = TRIAL_TOLERANCES
        .iter()
        .map(|&t| run_trial(positions, &base, t))
        .collect();

    let recommended = trials
        .iter()
        .find(|t| t.reduction_percentage >= RECOMMENDED_MIN_REDUCTION)
        .or_else(|| trials.last());

    let (recommended_tolerance, removed, savings_pct) = match recommended {
        Some(trial) => (
            trial.tolerance,
            positions.len().saturating_sub(trial.optimized_count) as u64,
            trial.reduction_percentage,
        ),
        None => (base.tolerance, 0, 0.0),
    };

    ToleranceAnalysis {
        original_count: positions.len(),
        original_distance_m: trajectory_length(positions),
        trials,
        recommended_tolerance,
        estimated_bandwidth_savings_bytes: removed * BYTES_PER_POSITION_JSON,
        estimated_storage_savings_bytes: removed * BYTES_PER_POSITION_STORED,
        estimated_savings_percentage: savings_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_percentage_rounding() {
        assert_eq!(reduction_percentage(0, 0), 0.0);
        assert_eq!(reduction_percentage(3, 1), 66.7);
        assert_eq!(reduction_percentage(100, 4), 96.0);
        assert_eq!(reduction_percentage(7, 7), 0.0);
    }

    #[test]
    fn test_resolved_replaces_invalid_values() {
        let options = OptimizationOptions {
            tolerance: f64::NAN,
            min_speed: -4.0,
            max_speed: f64::INFINITY,
            min_accuracy: 12.0,
            min_time_interval: -1,
            ..OptimizationOptions::default()
        };
        let resolved = options.resolved();
        assert_eq!(resolved.tolerance, 10.0);
        assert_eq!(resolved.min_speed, 5.0);
        assert_eq!(resolved.max_speed, 200.0);
        assert_eq!(resolved.min_accuracy, 12.0);
        assert_eq!(resolved.min_time_interval, 30_000);
    }

    #[test]
    fn test_presets() {
        let quick = OptimizationOptions::quick();
        assert_eq!(quick.tolerance, 10.0);
        assert_eq!(quick.min_time_interval, 30_000);
        assert!(quick.preserve_speed_changes);

        let aggressive = OptimizationOptions::aggressive();
        assert_eq!(aggressive.tolerance, 25.0);
        assert_eq!(aggressive.min_speed, 10.0);
        assert_eq!(aggressive.min_time_interval, 60_000);
        assert!(aggressive.preserve_stops);
        assert!(!aggressive.preserve_speed_changes);

        assert_eq!("Aggressive".parse::<Preset>(), Ok(Preset::Aggressive));
        assert_eq!(" quick ".parse::<Preset>(), Ok(Preset::Quick));
        assert!("turbo".parse::<Preset>().is_err());
    }

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let options: OptimizationOptions =
            serde_json::from_str(r#"{"tolerance": 30, "preserveStops": false}"#).unwrap();
        assert_eq!(options.tolerance, 30.0);
        assert!(!options.preserve_stops);
        assert_eq!(options.min_time_interval, 30_000);
        assert!(options.enable_speed_filter);
    }

    #[test]
    fn test_statistics_are_isolated_per_stage() {
        // 10 samples 10s apart, two inaccurate, one glitch
        let mut positions: Vec<Position> = (0..10)
            .map(|i| Position::new(i * 10_000, 51.5, -0.13 + i as f64 * 0.0001, 50.0))
            .collect();
        positions[3].accuracy = Some(500.0);
        positions[4].accuracy = Some(250.0);
        positions[6].speed = 950.0;

        let result = optimize_coordinates(&positions, &OptimizationOptions::default());
        assert_eq!(result.statistics.accuracy_filtered, 2);
        assert_eq!(result.statistics.speed_filtered, 1);
        // 0, 30, 60, 90 s survive alone
        assert_eq!(result.statistics.time_filtered, 6);
        assert!(result.optimized_count <= result.original_count);
    }

    #[test]
    fn test_disabled_filters_report_zero() {
        let positions: Vec<Position> = (0..5)
            .map(|i| Position::new(i, 51.5, -0.13, 500.0).with_accuracy(900.0))
            .collect();
        let options = OptimizationOptions {
            enable_accuracy_filter: false,
            enable_speed_filter: false,
            enable_time_filter: false,
            ..OptimizationOptions::default()
        };
        let result = optimize_coordinates(&positions, &options);
        assert_eq!(result.statistics.accuracy_filtered, 0);
        assert_eq!(result.statistics.speed_filtered, 0);
        assert_eq!(result.statistics.time_filtered, 0);
        assert_eq!(result.optimized_positions.first(), positions.first());
    }

    #[test]
    fn test_passthrough() {
        let positions: Vec<Position> = (0..4)
            .map(|i| Position::new(i * 1000, 51.5, -0.13 + i as f64 * 0.001, 30.0))
            .collect();
        let result = OptimizationResult::passthrough(positions.clone(), &OptimizationOptions::default());
        assert_eq!(result.original_count, 4);
        assert_eq!(result.optimized_count, 4);
        assert_eq!(result.reduction_percentage, 0.0);
        assert_eq!(result.optimized_positions, positions);
    }

    #[test]
    fn test_analyze_tolerances_recommends_smallest_sufficient() {
        // Zigzag with ~18 m amplitude, one sample per minute
        let positions: Vec<Position> = (0..60)
            .map(|i| {
                let offset = if i % 2 == 0 { 0.0 } else { 0.000162 };
                Position::new(i * 60_000, 51.5 + offset, -0.13 + i as f64 * 0.001, 50.0)
            })
            .collect();

        let analysis = analyze_tolerances(&positions, &OptimizationOptions::default());
        assert_eq!(analysis.trials.len(), 3);
        assert_eq!(analysis.trials[0].tolerance, 10.0);
        // 10 m keeps the zigzag, 25 m flattens it
        assert!(analysis.trials[0].reduction_percentage < 60.0);
        assert!(analysis.trials[1].reduction_percentage > 90.0);
        assert_eq!(analysis.recommended_tolerance, 25.0);
        assert_eq!(analysis.estimated_bandwidth_savings_bytes, 58 * 150);
        assert_eq!(analysis.estimated_storage_savings_bytes, 58 * 64);
    }

    #[test]
    fn test_analyze_tolerances_empty() {
        let analysis = analyze_tolerances(&[], &OptimizationOptions::default());
        assert_eq!(analysis.original_count, 0);
        assert_eq!(analysis.recommended_tolerance, 50.0);
        assert_eq!(analysis.estimated_bandwidth_savings_bytes, 0);
    }
}
