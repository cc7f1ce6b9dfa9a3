//! Douglas-Peucker line simplification with importance preservation.
//!
//! Plain Douglas-Peucker happily deletes a vehicle idling at a depot or a hard
//! braking event when those samples sit close to the chord between their
//! neighbours. [`advanced_douglas_peucker`] pins such samples as protected
//! indices and only simplifies the spans between them, so protected samples
//! come through exactly.

use crate::geometry::perpendicular_distance;
use crate::optimizer::OptimizationOptions;
use crate::Position;

/// Speed delta (km/h) to a neighbouring sample that marks a harsh
/// acceleration or braking event.
pub const SPEED_CHANGE_THRESHOLD_KMH: f64 = 20.0;

/// Simplify a trajectory with the Douglas-Peucker algorithm.
///
/// `tolerance` is in meters. Trajectories of two points or fewer are returned
/// unchanged; otherwise the first and last points are always kept.
///
/// # Example
/// ```rust
/// use trajectory_optimizer::{douglas_peucker, Position};
///
/// let track: Vec<Position> = (0..50)
///     .map(|i| Position::new(i * 1000, 51.5, -0.13 + i as f64 * 0.0002, 60.0))
///     .collect();
/// let simplified = douglas_peucker(&track, 5.0);
/// assert_eq!(simplified.len(), 2);
/// ```
pub fn douglas_peucker(points: &[Position], tolerance: f64) -> Vec<Position> {
    douglas_peucker_indices(points, tolerance)
        .into_iter()
        .map(|i| points[i].clone())
        .collect()
}

/// Indices of the points Douglas-Peucker keeps, in ascending order.
pub fn douglas_peucker_indices(points: &[Position], tolerance: f64) -> Vec<usize> {
    if points.len() <= 2 {
        return (0..points.len()).collect();
    }

    let mut keep = vec![false; points.len()];
    mark_span(points, 0, points.len() - 1, tolerance, &mut keep);

    keep.iter()
        .enumerate()
        .filter_map(|(i, &k)| if k { Some(i) } else { None })
        .collect()
}

/// Mark the points Douglas-Peucker keeps within `points[start..=end]`.
///
/// Recursion runs on an explicit stack of index ranges so straight-line
/// pathological inputs cannot overflow the call stack.
fn mark_span(points: &[Position], start: usize, end: usize, tolerance: f64, keep: &mut [bool]) {
    keep[start] = true;
    keep[end] = true;

    let mut stack = vec![(start, end)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }

        let chord_start = points[first].point();
        let chord_end = points[last].point();

        let mut max_distance = 0.0;
        let mut max_index = first;
        for (i, p) in points.iter().enumerate().take(last).skip(first + 1) {
            let d = perpendicular_distance(&p.point(), &chord_start, &chord_end);
            if d > max_distance {
                max_distance = d;
                max_index = i;
            }
        }

        if max_distance > tolerance && max_index != first {
            keep[max_index] = true;
            stack.push((max_index, last));
            stack.push((first, max_index));
        }
    }
}

/// Indices that simplification must never remove.
///
/// Stops (`speed < min_speed`) are protected when `preserve_stops` is set,
/// interior samples with a speed jump above [`SPEED_CHANGE_THRESHOLD_KMH`] to
/// either neighbour when `preserve_speed_changes` is set. The first and last
/// indices are always protected.
pub fn protected_indices(positions: &[Position], options: &OptimizationOptions) -> Vec<bool> {
    let n = positions.len();
    let mut protected = vec![false; n];
    if n == 0 {
        return protected;
    }

    if options.preserve_stops {
        for (flag, p) in protected.iter_mut().zip(positions) {
            if p.speed < options.min_speed {
                *flag = true;
            }
        }
    }

    if options.preserve_speed_changes && n >= 3 {
        for i in 1..n - 1 {
            let before = (positions[i].speed - positions[i - 1].speed).abs();
            let after = (positions[i + 1].speed - positions[i].speed).abs();
            if before > SPEED_CHANGE_THRESHOLD_KMH || after > SPEED_CHANGE_THRESHOLD_KMH {
                protected[i] = true;
            }
        }
    }

    protected[0] = true;
    protected[n - 1] = true;
    protected
}

/// Douglas-Peucker gated by protected stop and speed-change samples.
///
/// When `preserve_stops` is off, stops are treated as noise and dropped before
/// simplification. Otherwise the trajectory is split at every protected index
/// and each span is simplified on its own with `options.tolerance`.
pub fn advanced_douglas_peucker(positions: &[Position], options: &OptimizationOptions) -> Vec<Position> {
    let moving: Vec<Position>;
    let working: &[Position] = if options.preserve_stops {
        positions
    } else {
        moving = positions
            .iter()
            .filter(|p| !(p.speed < options.min_speed))
            .cloned()
            .collect();
        &moving
    };

    if working.len() <= 2 {
        return working.to_vec();
    }

    let protected = protected_indices(working, options);

    let mut keep = vec![false; working.len()];
    let mut span_start = 0;
    for (i, &is_protected) in protected.iter().enumerate().skip(1) {
        if is_protected {
            mark_span(working, span_start, i, options.tolerance, &mut keep);
            span_start = i;
        }
    }

    working
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| if k { Some(p.clone()) } else { None })
        .collect()
}
