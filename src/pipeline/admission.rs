//! Bounded admission gate for job execution.
//!
//! A counting semaphore with `limit` permits. Holders get an RAII
//! [`AdmissionPermit`]; the permit is returned when the guard is dropped, so
//! a job that fails, times out or is cancelled mid-flight cannot leak it.
//! The controller also tracks how many permits are held and the highest
//! number ever held at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting gate limiting concurrently admitted jobs.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    limit: usize,
}

impl AdmissionController {
    /// Creates a gate with `limit` permits. A zero limit is raised to 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            gauge: Arc::new(Gauge::default()),
            limit,
        }
    }

    /// Waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns `AcquireError` once the gate has been closed.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }

    /// Closes the gate. Pending and future `acquire` calls fail; permits
    /// already handed out stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Scoped admission. Releases its permit on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
