use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::gauge;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};

pub(crate) const METRIC_RENDER_INFLIGHT: &str = "dotserve_render_inflight";

/// What to do with a job that arrives while every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Wait for a slot, giving up after `max_wait`.
    Queue { max_wait: Duration },
    /// Fail immediately.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("all {capacity} render slots are busy")]
    Saturated { capacity: usize },
    #[error("no render slot became free within {}ms", .waited.as_millis())]
    QueueTimeout { capacity: usize, waited: Duration },
    #[error("render limiter is closed")]
    Closed,
}

/// A held render slot. The slot is returned when the permit is dropped, on
/// every exit path of the job that owns it.
pub struct RenderPermit {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RenderPermit {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Bounds how many engine processes may run at the same time.
#[async_trait]
pub trait ConcurrencyLimiter: Send + Sync {
    async fn acquire(&self) -> Result<RenderPermit, LimiterError>;

    fn capacity(&self) -> usize;

    fn in_flight(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct SemaphoreLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    policy: AdmissionPolicy,
    in_flight: Arc<AtomicUsize>,
}

impl SemaphoreLimiter {
    pub fn new(capacity: usize, policy: AdmissionPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            policy,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }
}

#[async_trait]
impl ConcurrencyLimiter for SemaphoreLimiter {
    async fn acquire(&self) -> Result<RenderPermit, LimiterError> {
        let capacity = self.capacity;
        let permit = match self.policy {
            AdmissionPolicy::Reject => {
                self.semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|err| match err {
                        TryAcquireError::NoPermits => LimiterError::Saturated { capacity },
                        TryAcquireError::Closed => LimiterError::Closed,
                    })?
            }
            AdmissionPolicy::Queue { max_wait } => {
                match tokio::time::timeout(max_wait, self.semaphore.clone().acquire_owned()).await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(LimiterError::Closed),
                    Err(_) => {
                        return Err(LimiterError::QueueTimeout {
                            capacity,
                            waited: max_wait,
                        });
                    }
                }
            }
        };

        let running = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!(METRIC_RENDER_INFLIGHT).set(running as f64);

        let in_flight = Arc::clone(&self.in_flight);
        Ok(RenderPermit::new(move || {
            // Count down before the slot is handed to the next waiter.
            let running = in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
            gauge!(METRIC_RENDER_INFLIGHT).set(running as f64);
            drop(permit);
        }))
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}
