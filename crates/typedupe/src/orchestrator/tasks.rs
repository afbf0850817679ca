//! Bounded worker pool for per-stream units of work.
//!
//! Every phase of a sync fans out one task per stream. Tasks are spawned on
//! the tokio runtime and each holds one semaphore permit while it runs, so at
//! most `td_threads` of them touch the destination at once. Results come back
//! in spawn order, which makes "first error" deterministic.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Result, TypeDedupeError};

/// A labelled task handle.
type Handle<T> = (String, JoinHandle<Result<T>>);

/// Semaphore-bounded task pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            cancel: CancellationToken::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting work.
    ///
    /// Tasks waiting for a permit fail with [`TypeDedupeError::ShutDown`];
    /// tasks already running are abandoned at their next await point.
    pub fn shutdown(&self) {
        self.semaphore.close();
        self.cancel.cancel();
    }

    /// Spawn one unit of work.
    pub fn spawn<F, T>(&self, label: impl Into<String>, work: F) -> Handle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let task_label = label.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TypeDedupeError::ShutDown)?;
            debug!("{}: started", task_label);
            tokio::select! {
                _ = cancel.cancelled() => Err(TypeDedupeError::ShutDown),
                result = work => result,
            }
        });

        (label, handle)
    }

    /// Spawn all `jobs` and wait for every one of them.
    pub async fn run_all<F, T>(&self, jobs: Vec<(String, F)>) -> Vec<(String, Result<T>)>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return jobs
                .into_iter()
                .map(|(label, _)| (label, Err(TypeDedupeError::ShutDown)))
                .collect();
        }

        let handles: Vec<Handle<T>> = jobs
            .into_iter()
            .map(|(label, work)| self.spawn(label, work))
            .collect();

        join_all(handles).await
    }
}

/// Await handles in order, turning panics into errors.
pub async fn join_all<T>(handles: Vec<Handle<T>>) -> Vec<(String, Result<T>)> {
    let mut results = Vec::with_capacity(handles.len());
    for (label, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("{}: task panicked - {}", label, e);
                Err(TypeDedupeError::TaskPanicked(format!("{}: {}", label, e)))
            }
        };
        results.push((label, result));
    }
    results
}

/// Log every failure, then return the first one.
pub fn log_all_and_return_first<T>(
    initial_message: &str,
    results: Vec<(String, Result<T>)>,
) -> Result<Vec<(String, T)>> {
    let mut first_error = None;
    let mut successes = Vec::new();

    for (label, result) in results {
        match result {
            Ok(value) => successes.push((label, value)),
            Err(e) => {
                error!("{} {}: {}", initial_message, label, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => {
            error!("{} Rethrowing first exception.", initial_message);
            Err(e)
        }
        None => Ok(successes),
    }
}
