//! Per-sample quality filters.
//!
//! Each filter is a total function over a trajectory: it only removes samples,
//! never reorders them, and never fails. Missing or malformed numeric fields
//! pass (fail-open), so a degraded device feed still renders a path.
//!
//! The pipeline applies them in a fixed order: accuracy, speed, time interval.

use crate::Position;

/// Keep positions whose accuracy is unknown or at most `min_accuracy` meters.
///
/// NaN or negative accuracy readings are treated as unknown.
pub fn filter_by_accuracy(positions: &[Position], min_accuracy: f64) -> Vec<Position> {
    positions
        .iter()
        .filter(|p| passes_accuracy(p, min_accuracy))
        .cloned()
        .collect()
}

#[inline]
fn passes_accuracy(position: &Position, min_accuracy: f64) -> bool {
    match position.accuracy {
        None => true,
        Some(a) if !a.is_finite() || a < 0.0 => true,
        Some(a) => a <= min_accuracy,
    }
}

/// Keep positions whose speed is at most `max_speed` km/h.
///
/// Drops satellite jumps that imply implausible velocities. NaN speed passes.
pub fn filter_by_speed(positions: &[Position], max_speed: f64) -> Vec<Position> {
    positions
        .iter()
        .filter(|p| passes_speed(p, max_speed))
        .cloned()
        .collect()
}

#[inline]
fn passes_speed(position: &Position, max_speed: f64) -> bool {
    match position.speed {
        s if !s.is_finite() || s < 0.0 => true,
        s => s <= max_speed,
    }
}

/// Keep a minimum-spacing subsequence: the first position, then each position
/// at least `min_interval_ms` after the last kept one.
///
/// Spacing is measured from the last *kept* sample, so this is not a fixed-grid
/// resample. A non-positive interval keeps everything.
pub fn filter_by_time_interval(positions: &[Position], min_interval_ms: i64) -> Vec<Position> {
    if min_interval_ms <= 0 {
        return positions.to_vec();
    }

    let mut result = Vec::with_capacity(positions.len());
    let mut last_kept: Option<i64> = None;

    for position in positions {
        let keep = match last_kept {
            None => true,
            Some(last) => position.timestamp.saturating_sub(last) >= min_interval_ms,
        };
        if keep {
            last_kept = Some(position.timestamp);
            result.push(position.clone());
        }
    }

    result
}
