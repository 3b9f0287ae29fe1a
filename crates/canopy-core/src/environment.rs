//! # Environment Primitives
//!
//! Identifier and time sources consumed by the hierarchy engine.
//!
//! Production code uses `UuidGenerator` and `SystemClock`. The sequential
//! and manual variants make identifiers and timestamps reproducible for
//! fixtures, benchmarks and tests.

use crate::{CanopyError, EntityId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of new entity identifiers.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> Result<EntityId, CanopyError>;
}

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> Result<EntityId, CanopyError> {
        Ok(EntityId(Uuid::new_v4()))
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic identifiers: `00000000-0000-0000-0000-000000000001`, `...02`, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&self) -> Result<EntityId, CanopyError> {
        let n = self
            .next
            .fetch_add(1, Ordering::Relaxed)
            .checked_add(1)
            .ok_or_else(|| CanopyError::IdGeneration {
                message: "sequential identifier space exhausted".to_string(),
            })?;
        Ok(EntityId(Uuid::from_u128(u128::from(n))))
    }
}

/// Clock that only moves when told to. Each `now()` call advances it by
/// `step`, so consecutive writes get distinct, ordered timestamps.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = *current;
        *current = now + self.step;
        now
    }
}
