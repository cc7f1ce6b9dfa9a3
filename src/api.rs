//! Transport-agnostic request handlers.
//!
//! [`Api::handle`] maps a path and decoded query parameters to a status code
//! and JSON body, so any HTTP framework can host it. Routes:
//!
//! - `GET /api/positions?deviceId=..` current or windowed positions
//! - `GET /api/history?deviceId=..&from=..&to=..` historical positions (last 24 h by default)
//! - `GET /api/optimization-stats/{deviceId}?days=..` tolerance recommendation
//! - `GET /health`
//!
//! Malformed numeric or boolean parameters are ignored and the default is
//! used instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::normalize::parse_timestamp_str;
use crate::optimizer::{OptimizationOptions, Preset};
use crate::service::{PositionQuery, PositionService, TimeWindow};

const DEFAULT_HISTORY_HOURS: u32 = 24;
const DEFAULT_STATS_DAYS: u32 = 7;
const MAX_STATS_DAYS: u32 = 90;

/// Status code and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::error(500, &format!("failed to encode response: {}", e)),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request router over a shared [`PositionService`].
pub struct Api {
    service: Arc<PositionService>,
    started_at: Instant,
}

impl Api {
    pub fn new(service: Arc<PositionService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }

    pub fn service(&self) -> &PositionService {
        &self.service
    }

    /// Route a GET request.
    pub async fn handle(&self, path: &str, params: &HashMap<String, String>) -> ApiResponse {
        let path = path.trim_end_matches('/');
        debug!("[Api] GET {} {:?}", path, params);

        match path {
            "/health" => self.health().await,
            "/api/positions" => self.positions(params).await,
            "/api/history" => self.history(params).await,
            _ => match path.strip_prefix("/api/optimization-stats/") {
                Some(device_id) if !device_id.is_empty() && !device_id.contains('/') => {
                    self.optimization_stats(device_id, params).await
                }
                _ => ApiResponse::error(404, &format!("no route for {}", path)),
            },
        }
    }

    async fn positions(&self, params: &HashMap<String, String>) -> ApiResponse {
        let Some(device_id) = device_id(params) else {
            return ApiResponse::error(400, "deviceId is required");
        };

        let mut query = PositionQuery::new(device_id).with_options(options_from_params(params));
        query.window = window_from_params(params);
        query.limit = parse_param(params, "limit").filter(|&n: &usize| n > 0);
        query.optimize = parse_bool(params, "optimize").unwrap_or(true);

        ApiResponse::ok(&self.service.positions(&query).await)
    }

    async fn history(&self, params: &HashMap<String, String>) -> ApiResponse {
        let Some(device_id) = device_id(params) else {
            return ApiResponse::error(400, "deviceId is required");
        };

        let mut query = PositionQuery::new(device_id).with_options(options_from_params(params));
        match window_from_params(params) {
            Some(window) => query.window = Some(window),
            None => query.trailing_hours = Some(DEFAULT_HISTORY_HOURS),
        }
        query.limit = parse_param(params, "limit").filter(|&n: &usize| n > 0);
        query.optimize = parse_bool(params, "optimize").unwrap_or(true);

        ApiResponse::ok(&self.service.positions(&query).await)
    }

    async fn optimization_stats(&self, device_id: &str, params: &HashMap<String, String>) -> ApiResponse {
        let days = parse_param::<u32>(params, "days")
            .unwrap_or(DEFAULT_STATS_DAYS)
            .clamp(1, MAX_STATS_DAYS);
        let options = options_from_params(params);

        ApiResponse::ok(&self.service.optimization_stats(device_id, days, &options).await)
    }

    async fn health(&self) -> ApiResponse {
        ApiResponse::ok(&json!({
            "status": "ok",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": self.started_at.elapsed().as_secs(),
            "cacheEntries": self.service.cache().len().await,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }
}

fn device_id(params: &HashMap<String, String>) -> Option<&str> {
    params
        .get("deviceId")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Parse `key`, or `None` (with a warning) when present but malformed.
fn parse_param<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Option<T> {
    let raw = params.get(key)?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[Api] ignoring malformed {}='{}'", key, raw);
            None
        }
    }
}

fn parse_bool(params: &HashMap<String, String>, key: &str) -> Option<bool> {
    let raw = params.get(key)?.trim().to_ascii_lowercase();
    match raw.as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        "" => None,
        _ => {
            warn!("[Api] ignoring malformed {}='{}'", key, raw);
            None
        }
    }
}

/// Finite, non-negative float parameter.
fn parse_metric(params: &HashMap<String, String>, key: &str) -> Option<f64> {
    parse_param::<f64>(params, key).filter(|v| v.is_finite() && *v >= 0.0)
}

/// Window from `from`/`to`; both must parse.
fn window_from_params(params: &HashMap<String, String>) -> Option<TimeWindow> {
    let from = params.get("from").and_then(|s| parse_timestamp_str(s));
    let to = params.get("to").and_then(|s| parse_timestamp_str(s));
    match (from, to) {
        (Some(from), Some(to)) => Some(TimeWindow::new(from, to)),
        (None, None) => None,
        _ => {
            warn!("[Api] incomplete or malformed from/to, ignoring window");
            None
        }
    }
}

/// Optimization options from query parameters.
///
/// An optional `preset` (`quick` or `aggressive`) supplies the base values,
/// and individual parameters override it.
pub fn options_from_params(params: &HashMap<String, String>) -> OptimizationOptions {
    let mut options = params
        .get("preset")
        .and_then(|p| p.parse::<Preset>().ok())
        .map(Preset::options)
        .unwrap_or_default();

    if let Some(v) = parse_metric(params, "tolerance") {
        options.tolerance = v;
    }
    if let Some(v) = parse_metric(params, "minSpeed") {
        options.min_speed = v;
    }
    if let Some(v) = parse_metric(params, "maxSpeed") {
        options.max_speed = v;
    }
    if let Some(v) = parse_metric(params, "minAccuracy") {
        options.min_accuracy = v;
    }
    if let Some(v) = parse_param::<i64>(params, "minTimeInterval").filter(|v| *v >= 0) {
        options.min_time_interval = v;
    }
    if let Some(v) = parse_bool(params, "preserveStops") {
        options.preserve_stops = v;
    }
    if let Some(v) = parse_bool(params, "preserveSpeedChanges") {
        options.preserve_speed_changes = v;
    }
    if let Some(v) = parse_bool(params, "enableAccuracyFilter") {
        options.enable_accuracy_filter = v;
    }
    if let Some(v) = parse_bool(params, "enableSpeedFilter") {
        options.enable_speed_filter = v;
    }
    if let Some(v) = parse_bool(params, "enableTimeFilter") {
        options.enable_time_filter = v;
    }
    options
}
