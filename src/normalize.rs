//! Boundary normalization of upstream position payloads.
//!
//! Tracking platforms disagree on field names (`lat`/`latitude`/`y`), time
//! fields and number encodings. Everything is folded into [`Position`] here so
//! the optimizer never sees the aliasing.

use chrono::{DateTime, NaiveDateTime};
use log::debug;
use serde_json::{Map, Value};

use crate::{GpsPoint, Position};

const LATITUDE_KEYS: [&str; 3] = ["latitude", "lat", "y"];
const LONGITUDE_KEYS: [&str; 4] = ["longitude", "lng", "lon", "x"];
/// Device time first, then the time the server received the sample.
const TIME_KEYS: [&str; 5] = ["deviceTime", "serverTime", "fixTime", "timestamp", "time"];

/// Epoch values below this are taken as seconds rather than milliseconds.
const EPOCH_SECONDS_CUTOFF: f64 = 100_000_000_000.0;

/// Convert an upstream JSON payload into a time-ordered trajectory.
///
/// Accepts an array of samples, a single sample object, or an object wrapping
/// the array under `positions` or `data`. Samples without finite in-range
/// coordinates or without a parsable time are dropped. The result is
/// stable-sorted by timestamp, so equal timestamps keep arrival order.
///
/// # Example
/// ```
/// use serde_json::json;
/// use trajectory_optimizer::normalize_positions;
///
/// let payload = json!([
///     { "lat": 51.5, "lon": -0.12, "deviceTime": "2024-03-01T10:00:05Z", "speed": 42 },
///     { "y": 51.6, "x": -0.11, "serverTime": 1709287200000i64 },
/// ]);
/// let positions = normalize_positions(&payload);
/// assert_eq!(positions.len(), 2);
/// assert_eq!(positions[0].latitude, 51.6);
/// ```
pub fn normalize_positions(payload: &Value) -> Vec<Position> {
    let samples: &[Value] = match payload {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("positions").or_else(|| map.get("data")) {
            Some(Value::Array(items)) => items,
            _ => std::slice::from_ref(payload),
        },
        _ => &[],
    };

    let mut positions: Vec<Position> = samples.iter().filter_map(normalize_sample).collect();
    let dropped = samples.len() - positions.len();
    if dropped > 0 {
        debug!(
            "[normalize_positions] dropped {} of {} malformed samples",
            dropped,
            samples.len()
        );
    }

    positions.sort_by_key(|p| p.timestamp);
    positions
}

/// Normalize one sample, or `None` if it has no usable coordinate or time.
pub fn normalize_sample(sample: &Value) -> Option<Position> {
    let map = sample.as_object()?;

    let latitude = first_number(map, &LATITUDE_KEYS)?;
    let longitude = first_number(map, &LONGITUDE_KEYS)?;
    if !GpsPoint::new(latitude, longitude).is_valid() {
        return None;
    }

    let timestamp = TIME_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(parse_timestamp)?;

    let device_id = match map.get("deviceId") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let attributes = match map.get("attributes") {
        Some(Value::Object(attrs)) => attrs.clone(),
        _ => Map::new(),
    };

    Some(Position {
        device_id,
        timestamp,
        latitude,
        longitude,
        speed: first_number(map, &["speed"]).unwrap_or(0.0),
        course: first_number(map, &["course"]),
        accuracy: first_number(map, &["accuracy"]),
        attributes,
    })
}

/// First key present as a finite number (or numeric string).
fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(as_number)
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse a time value into Unix milliseconds.
///
/// Accepts RFC 3339 strings (`2024-03-01T10:00:00.000+00:00`), naive
/// `YYYY-MM-DD HH:MM:SS` strings (read as UTC), and epoch numbers in
/// milliseconds or seconds.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => epoch_to_millis(n.as_f64()?),
        _ => None,
    }
}

/// String form of [`parse_timestamp`].
pub fn parse_timestamp_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    s.parse::<f64>().ok().and_then(epoch_to_millis)
}

fn epoch_to_millis(n: f64) -> Option<i64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    if n < EPOCH_SECONDS_CUTOFF {
        Some((n * 1000.0).round() as i64)
    } else {
        Some(n.round() as i64)
    }
}
