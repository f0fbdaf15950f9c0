use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Clock abstraction handed to a connection at construction time.
///
/// Production drivers use [`SystemTimeProvider`]; tests drive the engine
/// deterministically with [`ManualTimeProvider`].
pub trait TimeProvider: Debug + Send + Sync {
    fn now_instant(&self) -> Instant;
    /// Wall-clock milliseconds since the Unix epoch, for drivers that log
    /// or correlate with external timelines.
    fn now_ms(&self) -> i64;
}

/// The real clock.
#[derive(Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_instant(&self) -> Instant {
        Instant::now()
    }

    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A manual time provider for deterministic simulations.
#[derive(Debug)]
pub struct ManualTimeProvider {
    instant: std::sync::RwLock<Instant>,
    system_ms: std::sync::RwLock<i64>,
}

impl ManualTimeProvider {
    pub fn new(instant: Instant, system_ms: i64) -> Self {
        Self {
            instant: std::sync::RwLock::new(instant),
            system_ms: std::sync::RwLock::new(system_ms),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.instant.write().unwrap() += duration;
        *self.system_ms.write().unwrap() += duration.as_millis() as i64;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_instant(&self) -> Instant {
        *self.instant.read().unwrap()
    }

    fn now_ms(&self) -> i64 {
        *self.system_ms.read().unwrap()
    }
}
