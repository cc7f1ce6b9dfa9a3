//! # Trajectory Optimizer
//!
//! GPS trajectory optimization for fleet tracking dashboards.
//!
//! This library provides:
//! - Quality filters (accuracy, speed plausibility, minimum time spacing)
//! - Douglas-Peucker simplification that never drops stops or harsh speed changes
//! - An optimization pipeline with per-stage statistics and presets
//! - A fetch service with upstream fallbacks, a TTL cache and pass-through degradation
//!
//! ## Features
//!
//! - **`http`** (default) - reqwest clients for the tracking API and remote optimizer
//! - **`parallel`** - Run tolerance trials with rayon
//! - **`cli`** - Build the `trajectory-cli` binary
//!
//! ## Quick Start
//!
//! ```rust
//! use trajectory_optimizer::{optimize_coordinates, OptimizationOptions, Position};
//!
//! // A vehicle driving north at 50 km/h, one sample per minute
//! let positions: Vec<Position> = (0..20)
//!     .map(|i| Position::new(i * 60_000, 51.50 + i as f64 * 0.001, -0.1278, 50.0))
//!     .collect();
//!
//! let result = optimize_coordinates(&positions, &OptimizationOptions::default());
//! assert_eq!(result.optimized_count, 2);
//! println!("Removed {}% of points", result.reduction_percentage);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrajectoryError};

// Distance kernels
pub mod geometry;

// Per-sample quality filters
pub mod filters;

// Douglas-Peucker with protected points
pub mod simplify;
pub use simplify::{advanced_douglas_peucker, douglas_peucker};

// Pipeline orchestration and presets
pub mod optimizer;
pub use optimizer::{
    aggressive_optimize, analyze_tolerances, optimize_coordinates, quick_optimize,
    OptimizationOptions, OptimizationResult, OptimizationStatistics, Preset, ToleranceAnalysis,
    ToleranceTrial,
};

// Upstream JSON to canonical positions
pub mod normalize;
pub use normalize::{normalize_positions, parse_timestamp};

// TTL cache with single-flight loading
pub mod cache;
pub use cache::{SharedCache, TtlCache};

// Service configuration
pub mod config;
pub use config::ServiceConfig;

// Fetch, cache and fallback service
pub mod service;
pub use service::{
    OptimizationBackend, OptimizationStatsReport, PositionQuery, PositionService, PositionSource,
    PositionsResponse, TimeWindow,
};

// HTTP clients for the tracking API and remote optimizer
#[cfg(feature = "http")]
pub mod upstream;
#[cfg(feature = "http")]
pub use upstream::{RemoteOptimizerClient, TrackingApiClient};

// Transport-agnostic request handlers
pub mod api;
pub use api::{options_from_params, Api, ApiResponse};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trajectory_optimizer::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One GPS sample reported by a tracking device.
///
/// Positions are request-scoped value data. Every pipeline stage takes a
/// trajectory (`&[Position]`) and returns an order-preserving subsequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Device that reported the sample, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in km/h (0 = stationary)
    #[serde(default)]
    pub speed: f64,
    /// Heading in degrees, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    /// Horizontal accuracy in meters, None = unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Free-form device attributes (fuelLevel, harshBraking, odometer, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Position {
    /// Create a position with no accuracy, course or attributes.
    pub fn new(timestamp: i64, latitude: f64, longitude: f64, speed: f64) -> Self {
        Self {
            device_id: None,
            timestamp,
            latitude,
            longitude,
            speed,
            course: None,
            accuracy: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Builder-style accuracy setter.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// The sample's coordinate.
    #[inline]
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}
