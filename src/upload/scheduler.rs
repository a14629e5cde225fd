//! Concurrency limit for batch submission.
//!
//! When more than one batch may be in flight, every submission holds a
//! permit from this scheduler for the duration of its `addOperations` call.
//!
//! ```ignore
//! let scheduler = BatchScheduler::new(NonZeroUsize::new(4).unwrap());
//! let permit = scheduler.acquire().await?;
//! // submit one batch while holding the permit...
//! drop(permit);
//! ```

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// BatchScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Semaphore-backed limit on concurrent batch submissions.
///
/// Permits are released when dropped, so a cancelled or failed submission
/// always frees its slot.
#[derive(Clone)]
pub struct BatchScheduler {
    sem: Arc<Semaphore>,
    limit: usize,
}

impl BatchScheduler {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(limit.get())),
            limit: limit.get(),
        }
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// `AppError::Internal` if the scheduler was closed.
    pub async fn acquire(&self) -> Result<BatchPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Batch scheduler closed".to_string()))?;

        Ok(BatchPermit {
            _permit: permit,
            limit: self.limit,
            sem: self.sem.clone(),
        })
    }

    /// Number of submissions currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limit - self.sem.available_permits()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchPermit
// ─────────────────────────────────────────────────────────────────────────────

/// One occupied submission slot, released on drop.
pub struct BatchPermit {
    _permit: OwnedSemaphorePermit,
    limit: usize,
    sem: Arc<Semaphore>,
}

impl BatchPermit {
    /// Submissions in flight, this one included.
    pub fn in_flight(&self) -> usize {
        self.limit - self.sem.available_permits()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
