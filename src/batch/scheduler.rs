//! Batch job scheduler using Rayon.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::job::{ConversionJob, JobResult};
use crate::error::{ImagingError, Result};

/// Runs independent jobs on a dedicated thread pool.
pub struct BatchScheduler {
    /// Number of threads to use.
    num_threads: usize,

    /// Cancellation flag.
    cancelled: Arc<AtomicBool>,

    /// Number of jobs completed.
    completed: Arc<AtomicUsize>,
}

impl BatchScheduler {
    /// Create a new scheduler with the specified number of threads.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the number of threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Get the number of completed jobs.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Reset the scheduler state.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    /// Run `processor` over every job in parallel.
    ///
    /// Results come back in job order. `progress` sees the completed count
    /// and the total after each job.
    pub fn schedule<F, P>(&self, jobs: Vec<ConversionJob>, processor: F, progress: P) -> Result<Vec<JobResult>>
    where
        F: Fn(&ConversionJob) -> JobResult + Send + Sync,
        P: Fn(&JobResult, usize, usize) + Send + Sync,
    {
        let cancelled = self.cancelled.clone();
        let completed = self.completed.clone();
        let total = jobs.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| ImagingError::Io(std::io::Error::other(e.to_string())))?;

        Ok(pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    if cancelled.load(Ordering::SeqCst) {
                        return JobResult::cancelled(job);
                    }
                    let result = processor(&job);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress(&result, done, total);
                    result
                })
                .collect()
        }))
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::JobStatus;
    use std::path::PathBuf;

    fn jobs(n: u64) -> Vec<ConversionJob> {
        (0..n)
            .map(|i| ConversionJob::new(i, PathBuf::from(format!("{}.bmp", i)), PathBuf::from(format!("{}.png", i))))
            .collect()
    }

    fn failing(job: &ConversionJob) -> JobResult {
        JobResult {
            job: job.clone(),
            outcome: None,
            error: Some(ImagingError::UnknownFormat),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = BatchScheduler::new(0);
        assert_eq!(scheduler.num_threads(), 1);
        assert_eq!(BatchScheduler::default().num_threads(), num_cpus::get());
    }

    #[test]
    fn test_schedule_keeps_job_order() {
        let scheduler = BatchScheduler::new(3);
        let seen = AtomicUsize::new(0);
        let results = scheduler
            .schedule(jobs(8), failing, |_, _, total| {
                assert_eq!(total, 8);
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.job.id).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
        assert_eq!(scheduler.completed(), 8);
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_cancelled_jobs_do_not_run() {
        let scheduler = BatchScheduler::new(1);
        scheduler.cancel();
        let results = scheduler
            .schedule(jobs(4), |_| unreachable!(), |_, _, _| {})
            .unwrap();
        assert!(results.iter().all(|r| r.status() == JobStatus::Cancelled));
        scheduler.reset();
        assert!(!scheduler.is_cancelled());
    }
}
