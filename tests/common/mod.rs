//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use trajectory_optimizer::cache::SharedCache;
use trajectory_optimizer::{
    OptimizationBackend, Position, PositionQuery, PositionService, PositionSource, PositionsResponse,
    Result, TimeWindow, TrajectoryError,
};

pub const T0: i64 = 1_709_287_200_000; // 2024-03-01T10:00:00Z
pub const MINUTE: i64 = 60_000;

/// How a mocked upstream call behaves.
#[derive(Clone)]
pub enum Behavior<T> {
    Respond(T),
    Fail,
    /// Never answers within any realistic timeout
    Hang,
}

impl<T: Send + 'static> Behavior<T> {
    async fn run(self) -> Result<T> {
        match self {
            Behavior::Respond(value) => Ok(value),
            Behavior::Fail => Err(TrajectoryError::http("upstream exploded", Some(502))),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TrajectoryError::http("too late", None))
            }
        }
    }
}

pub struct MockSource {
    pub route: Behavior<Vec<Position>>,
    pub current: Behavior<Vec<Position>>,
    pub route_calls: AtomicU32,
    pub current_calls: AtomicU32,
}

impl MockSource {
    pub fn new(route: Behavior<Vec<Position>>, current: Behavior<Vec<Position>>) -> Self {
        Self {
            route,
            current,
            route_calls: AtomicU32::new(0),
            current_calls: AtomicU32::new(0),
        }
    }

    pub fn route_calls(&self) -> u32 {
        self.route_calls.load(Ordering::SeqCst)
    }

    pub fn current_calls(&self) -> u32 {
        self.current_calls.load(Ordering::SeqCst)
    }
}

impl PositionSource for MockSource {
    fn route_report<'a>(
        &'a self,
        _device_id: &'a str,
        _window: &'a TimeWindow,
    ) -> BoxFuture<'a, Result<Vec<Position>>> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        self.route.clone().run().boxed()
    }

    fn current_positions<'a>(&'a self, _device_id: &'a str) -> BoxFuture<'a, Result<Vec<Position>>> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        self.current.clone().run().boxed()
    }
}

pub struct MockBackend {
    pub behavior: Behavior<PositionsResponse>,
    pub calls: AtomicU32,
}

impl MockBackend {
    pub fn new(behavior: Behavior<PositionsResponse>) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OptimizationBackend for MockBackend {
    fn optimize<'a>(&'a self, _query: &'a PositionQuery) -> BoxFuture<'a, Result<PositionsResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.clone().run().boxed()
    }
}

/// `n` samples one minute apart, driving north at 50 km/h from `start`.
pub fn drive(start: i64, n: usize) -> Vec<Position> {
    (0..n)
        .map(|i| Position::new(start + i as i64 * MINUTE, 51.5 + i as f64 * 0.0008, -0.1278, 50.0))
        .collect()
}

pub fn service(source: Arc<MockSource>) -> PositionService {
    let cache = Arc::new(SharedCache::new(100, Duration::from_secs(300)));
    PositionService::new(source, cache).with_upstream_timeout(Duration::from_secs(15))
}
