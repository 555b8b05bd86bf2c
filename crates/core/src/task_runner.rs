//! Fixed-capacity gate for concurrently running jobs.
//!
//! Each slot is a semaphore permit. `run_task` waits for a permit (or for
//! cancellation), spawns the job holding it, and the permit is released when
//! the job finishes. `wait_all` joins every launched job.

use crate::cancel::CancelSignal;
use crate::{BackupError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// Slots used when a backup allows multithreading.
pub const MULTITHREADED_CAPACITY: usize = 4;

pub struct TaskRunner<T: 'static> {
    capacity: usize,
    slots: Arc<Semaphore>,
    running: JoinSet<T>,
    completed: Vec<T>,
}

impl<T: Send + 'static> TaskRunner<T> {
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = requested_capacity.max(1);
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            running: JoinSet::new(),
            completed: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a slot.
    pub fn active(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Start `job` once a slot is free. Returns `false` without starting the
    /// job if cancellation arrives first.
    pub async fn run_task<F>(&mut self, job: F, cancel: &CancelSignal) -> Result<bool>
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.reap_finished()?;

        if self.slots.available_permits() == 0 {
            debug!("All {} task slots busy, waiting", self.capacity);
        }
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(false),
            permit = self.slots.clone().acquire_owned() => permit.map_err(|e| BackupError::Task {
                reason: format!("task slots closed: {}", e),
            })?,
        };

        self.running.spawn(async move {
            let output = job.await;
            drop(permit);
            output
        });
        Ok(true)
    }

    /// Wait for every launched job. Returns `false` if cancellation arrived
    /// before they all finished.
    pub async fn wait_all(&mut self, cancel: &CancelSignal) -> Result<bool> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                next = self.running.join_next() => next,
            };
            match next {
                Some(joined) => self.record(joined)?,
                None => return Ok(true),
            }
        }
    }

    /// Join jobs still running after a cancelled `wait_all`. Each job is
    /// expected to return at its own next cancellation check.
    pub async fn drain(&mut self) -> Result<()> {
        while let Some(joined) = self.running.join_next().await {
            self.record(joined)?;
        }
        Ok(())
    }

    /// Outputs of jobs that have finished so far.
    pub fn take_completed(&mut self) -> Vec<T> {
        std::mem::take(&mut self.completed)
    }

    fn reap_finished(&mut self) -> Result<()> {
        while let Some(joined) = self.running.try_join_next() {
            self.record(joined)?;
        }
        Ok(())
    }

    fn record(&mut self, joined: std::result::Result<T, JoinError>) -> Result<()> {
        match joined {
            Ok(output) => {
                self.completed.push(output);
                Ok(())
            }
            Err(e) => {
                error!("Backup task failed: {}", e);
                Err(BackupError::Task {
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl<T: 'static> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        // Let in-flight jobs reach their next cancellation check instead of
        // aborting them mid-copy.
        self.running.detach_all();
    }
}
