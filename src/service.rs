//! Fetch, cache and fallback service.
//!
//! Resolves raw positions for a device through a chain of upstream strategies,
//! optimizes them (in-process or through a remote optimization backend) and
//! caches the response for a short TTL. Every failure degrades to "less data"
//! or "less optimized", never to an error:
//!
//! 1. Route report for the explicit `from`/`to` window
//! 2. Current positions filtered to the window on our side
//! 3. Current positions unfiltered
//!
//! If the remote backend is unreachable the raw trajectory is returned
//! unoptimized with a 0% reduction.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::SharedCache;
use crate::config::DEFAULT_UPSTREAM_TIMEOUT;
use crate::optimizer::{
    analyze_tolerances, optimize_coordinates, OptimizationOptions, OptimizationResult,
    ToleranceAnalysis,
};
use crate::{Position, Result, TrajectoryError};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// Request and response types
// ============================================================================

/// Closed time range in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    /// Create a window; reversed bounds are swapped.
    pub fn new(from: i64, to: i64) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// The `days` days ending now.
    pub fn last_days(days: u32) -> Self {
        let now = Utc::now().timestamp_millis();
        Self::new(now - i64::from(days) * MS_PER_DAY, now)
    }

    /// The `hours` hours ending now.
    pub fn last_hours(hours: u32) -> Self {
        let now = Utc::now().timestamp_millis();
        Self::new(now - i64::from(hours) * MS_PER_DAY / 24, now)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.from && timestamp <= self.to
    }

    pub fn from_rfc3339(&self) -> String {
        format_millis(self.from)
    }

    pub fn to_rfc3339(&self) -> String {
        format_millis(self.to)
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// One request for a device's positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionQuery {
    pub device_id: String,
    pub window: Option<TimeWindow>,
    /// Window ending at load time, used when `window` is unset. Keyed by
    /// its length so repeated polls share a cache entry.
    pub trailing_hours: Option<u32>,
    /// Keep only the most recent `limit` raw positions
    pub limit: Option<usize>,
    /// When false, positions are returned as fetched
    pub optimize: bool,
    pub options: OptimizationOptions,
}

impl PositionQuery {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            window: None,
            trailing_hours: None,
            limit: None,
            optimize: true,
            options: OptimizationOptions::default(),
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// The `hours` hours before the request is served.
    pub fn with_trailing_hours(mut self, hours: u32) -> Self {
        self.trailing_hours = Some(hours);
        self
    }

    /// Explicit window, or the trailing window resolved against now.
    pub fn effective_window(&self) -> Option<TimeWindow> {
        self.window
            .or_else(|| self.trailing_hours.map(TimeWindow::last_hours))
    }

    pub fn with_options(mut self, options: OptimizationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_optimization(mut self) -> Self {
        self.optimize = false;
        self
    }

    /// Cache identity of this request.
    pub fn cache_key(&self) -> CacheKey {
        let o = self.options.resolved();
        CacheKey {
            device_id: self.device_id.clone(),
            from: self.window.map(|w| w.from),
            to: self.window.map(|w| w.to),
            trailing_hours: if self.window.is_none() { self.trailing_hours } else { None },
            limit: self.limit,
            tolerance_bucket: o.tolerance.round() as i64,
            optimize: self.optimize,
            options_digest: format!(
                "{}:{}:{}:{}:{}{}{}{}{}",
                o.min_speed,
                o.max_speed,
                o.min_accuracy,
                o.min_time_interval,
                o.preserve_stops as u8,
                o.preserve_speed_changes as u8,
                o.enable_accuracy_filter as u8,
                o.enable_speed_filter as u8,
                o.enable_time_filter as u8,
            ),
        }
    }

    /// Query-string form understood by the service API.
    pub fn to_query_params(&self) -> Vec<(&'static str, String)> {
        let o = &self.options;
        let mut params = vec![("deviceId", self.device_id.clone())];
        if let Some(window) = self.effective_window() {
            params.push(("from", window.from_rfc3339()));
            params.push(("to", window.to_rfc3339()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params.extend([
            ("optimize", self.optimize.to_string()),
            ("tolerance", o.tolerance.to_string()),
            ("minSpeed", o.min_speed.to_string()),
            ("maxSpeed", o.max_speed.to_string()),
            ("minAccuracy", o.min_accuracy.to_string()),
            ("minTimeInterval", o.min_time_interval.to_string()),
            ("preserveStops", o.preserve_stops.to_string()),
            ("preserveSpeedChanges", o.preserve_speed_changes.to_string()),
            ("enableAccuracyFilter", o.enable_accuracy_filter.to_string()),
            ("enableSpeedFilter", o.enable_speed_filter.to_string()),
            ("enableTimeFilter", o.enable_time_filter.to_string()),
        ]);
        params
    }
}

/// Cache key: request identity with the tolerance bucketed to whole meters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device_id: String,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub trailing_hours: Option<u32>,
    pub limit: Option<usize>,
    pub tolerance_bucket: i64,
    pub optimize: bool,
    options_digest: String,
}

/// `{ positions, optimization }` as returned to map renderers.
///
/// `positions` holds the optimized points; they are moved out of
/// `optimization` so the payload carries them once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
    pub optimization: OptimizationResult,
}

impl PositionsResponse {
    pub fn from_result(mut result: OptimizationResult) -> Self {
        Self {
            positions: std::mem::take(&mut result.optimized_positions),
            optimization: result,
        }
    }

    /// Raw positions returned without optimization.
    pub fn passthrough(positions: Vec<Position>, options: &OptimizationOptions) -> Self {
        Self::from_result(OptimizationResult::passthrough(positions, options))
    }
}

/// Tolerance recommendation for a device over its recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationStatsReport {
    pub device_id: String,
    pub days: u32,
    pub window: TimeWindow,
    #[serde(flatten)]
    pub analysis: ToleranceAnalysis,
}

// ============================================================================
// Seams
// ============================================================================

/// Upstream tracking API.
pub trait PositionSource: Send + Sync {
    /// Historical route for an explicit window.
    fn route_report<'a>(
        &'a self,
        device_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, Result<Vec<Position>>>;

    /// Whatever positions the platform currently holds for the device.
    fn current_positions<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<Vec<Position>>>;
}

/// Remote optimization microservice.
pub trait OptimizationBackend: Send + Sync {
    fn optimize<'a>(&'a self, query: &'a PositionQuery) -> BoxFuture<'a, Result<PositionsResponse>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStrategy {
    RouteReport,
    WindowedPositions,
    LatestPositions,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStrategy::RouteReport => "route report",
            FetchStrategy::WindowedPositions => "windowed positions",
            FetchStrategy::LatestPositions => "latest positions",
        };
        f.write_str(name)
    }
}

/// Raw positions plus whether every attempted strategy failed.
struct RawFetch {
    positions: Vec<Position>,
    degraded: bool,
}

// ============================================================================
// Service
// ============================================================================

pub type ResponseCache = SharedCache<CacheKey, PositionsResponse>;

/// Position service with injected source, optional remote backend and cache.
pub struct PositionService {
    source: Arc<dyn PositionSource>,
    backend: Option<Arc<dyn OptimizationBackend>>,
    cache: Arc<ResponseCache>,
    upstream_timeout: Duration,
}

impl PositionService {
    /// Service that optimizes in-process.
    pub fn new(source: Arc<dyn PositionSource>, cache: Arc<ResponseCache>) -> Self {
        Self {
            source,
            backend: None,
            cache,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Delegate optimization to a remote backend, falling back to raw
    /// positions when it is unreachable.
    pub fn with_backend(mut self, backend: Arc<dyn OptimizationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Build the HTTP-backed service described by `config`.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::ServiceConfig) -> Result<Self> {
        use crate::upstream::{RemoteOptimizerClient, TrackingApiClient};

        let source = Arc::new(TrackingApiClient::from_config(config)?);
        let cache = Arc::new(ResponseCache::new(config.cache_capacity, config.cache_ttl));
        let mut service = Self::new(source, cache).with_upstream_timeout(config.upstream_timeout);

        if let Some(url) = &config.optimizer_url {
            info!("[PositionService] remote optimizer at {}", url);
            service = service.with_backend(Arc::new(RemoteOptimizerClient::new(
                url,
                config.upstream_timeout,
            )?));
        }
        Ok(service)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Positions for a query, from cache when a live entry exists.
    pub async fn positions(&self, query: &PositionQuery) -> PositionsResponse {
        let start = Instant::now();
        let response = self
            .cache
            .get_or_load(query.cache_key(), || self.load(query))
            .await;

        debug!(
            "[PositionService] device {} -> {} positions ({:.1}% reduction) in {} ms",
            query.device_id,
            response.positions.len(),
            response.optimization.reduction_percentage,
            start.elapsed().as_millis()
        );
        response
    }

    /// Raw positions for a device, trying each fetch strategy in turn.
    ///
    /// Never fails: exhausted strategies yield an empty trajectory.
    pub async fn resolve_positions(
        &self,
        device_id: &str,
        window: Option<&TimeWindow>,
        limit: Option<usize>,
    ) -> Vec<Position> {
        self.fetch_raw(device_id, window, limit).await.positions
    }

    /// Trial-run three tolerances over the last `days` days of raw positions.
    pub async fn optimization_stats(
        &self,
        device_id: &str,
        days: u32,
        options: &OptimizationOptions,
    ) -> OptimizationStatsReport {
        let window = TimeWindow::last_days(days);
        let raw = self.fetch_raw(device_id, Some(&window), None).await;
        let analysis = analyze_tolerances(&raw.positions, options);

        info!(
            "[PositionService] stats for device {}: {} raw positions over {} days, recommend {} m",
            device_id, analysis.original_count, days, analysis.recommended_tolerance
        );

        OptimizationStatsReport {
            device_id: device_id.to_string(),
            days,
            window,
            analysis,
        }
    }

    /// Produce a response and whether it may be cached.
    async fn load(&self, query: &PositionQuery) -> (PositionsResponse, bool) {
        let window = query.effective_window();
        let window = window.as_ref();

        if !query.optimize {
            let raw = self.fetch_raw(&query.device_id, window, query.limit).await;
            return (
                PositionsResponse::passthrough(raw.positions, &query.options),
                !raw.degraded,
            );
        }

        if let Some(backend) = &self.backend {
            match self.bounded("remote optimizer", backend.optimize(query)).await {
                Ok(response) => return (response, true),
                Err(e) => {
                    warn!(
                        "[PositionService] optimizer unavailable for device {} ({}), returning raw positions",
                        query.device_id, e
                    );
                    let raw = self.fetch_raw(&query.device_id, window, query.limit).await;
                    return (PositionsResponse::passthrough(raw.positions, &query.options), false);
                }
            }
        }

        let raw = self.fetch_raw(&query.device_id, window, query.limit).await;
        let result = optimize_coordinates(&raw.positions, &query.options);
        (PositionsResponse::from_result(result), !raw.degraded)
    }

    async fn fetch_raw(
        &self,
        device_id: &str,
        window: Option<&TimeWindow>,
        limit: Option<usize>,
    ) -> RawFetch {
        let start = Instant::now();
        let mut attempts = 0;
        let mut failures = 0;

        let mut resolved: Option<(Vec<Position>, FetchStrategy)> = None;

        if let Some(window) = window {
            attempts += 1;
            match self
                .bounded("route report", self.source.route_report(device_id, window))
                .await
            {
                Ok(positions) if !positions.is_empty() => {
                    resolved = Some((positions, FetchStrategy::RouteReport));
                }
                Ok(_) => debug!("[PositionService] route report empty for device {}", device_id),
                Err(e) => {
                    failures += 1;
                    warn!("[PositionService] route report failed for device {}: {}", device_id, e);
                }
            }
        }

        if resolved.is_none() {
            attempts += 1;
            // One call serves both the windowed and the unfiltered strategy
            match self
                .bounded("current positions", self.source.current_positions(device_id))
                .await
            {
                Ok(all) => {
                    let windowed: Vec<Position> = match window {
                        Some(w) => all.iter().filter(|p| w.contains(p.timestamp)).cloned().collect(),
                        None => Vec::new(),
                    };
                    if !windowed.is_empty() {
                        resolved = Some((windowed, FetchStrategy::WindowedPositions));
                    } else if !all.is_empty() {
                        resolved = Some((all, FetchStrategy::LatestPositions));
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "[PositionService] current positions failed for device {}: {}",
                        device_id, e
                    );
                }
            }
        }

        let Some((mut positions, strategy)) = resolved else {
            warn!(
                "[PositionService] no positions for device {} ({} of {} strategies failed, {} ms)",
                device_id,
                failures,
                attempts,
                start.elapsed().as_millis()
            );
            // An empty answer is only trusted when no strategy failed
            return RawFetch {
                positions: Vec::new(),
                degraded: failures > 0,
            };
        };

        if let Some(limit) = limit {
            if positions.len() > limit {
                positions.drain(..positions.len() - limit);
            }
        }

        info!(
            "[PositionService] device {}: {} positions via {} ({} ms)",
            device_id,
            positions.len(),
            strategy,
            start.elapsed().as_millis()
        );

        RawFetch {
            positions,
            degraded: false,
        }
    }

    /// Run an upstream call under the configured timeout.
    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.upstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TrajectoryError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.upstream_timeout.as_millis() as u64,
            }),
        }
    }
}
