//! Bounded concurrency executor for one wave of independent tasks.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{HarvestError, Result};

/// A failed task, tagged with the input it was started for.
#[derive(Debug)]
pub struct TaskFailure<I> {
    pub input: I,
    pub error: HarvestError,
}

/// Collected outcomes of a wave.
#[derive(Debug)]
pub struct WaveResult<I, T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<TaskFailure<I>>,
    /// Inputs never started because cancellation arrived first.
    pub skipped: Vec<I>,
}

impl<I, T> WaveResult<I, T> {
    /// Every input was started (none skipped by cancellation).
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

enum Outcome<I, T> {
    Done(T),
    Failed(TaskFailure<I>),
    Skipped(I),
}

/// Runs tasks with at most `max_in_flight` of them active at once.
///
/// A failing task never cancels its siblings. With pacing enabled every task
/// holds its slot for a jittered `delay * [0.8, 1.2)` after finishing, so the
/// pause is per worker and throughput still scales with the worker count.
#[derive(Clone, Debug)]
pub struct Executor {
    max_in_flight: usize,
    pacing: Option<Duration>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(max_in_flight: usize, cancel: CancellationToken) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            pacing: None,
            cancel,
        }
    }

    /// Enable per-task pacing; a zero delay disables it.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        self.pacing = (!delay.is_zero()).then_some(delay);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run `task` for every input and collect each outcome.
    ///
    /// Once the cancellation token fires no further task is started; tasks
    /// already running finish normally.
    pub async fn run<I, T, F, Fut>(&self, inputs: Vec<I>, task: F) -> WaveResult<I, T>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let task = &task;
        let outcomes: Vec<Outcome<I, T>> = stream::iter(inputs)
            .map(|input| async move {
                if self.cancel.is_cancelled() {
                    return Outcome::Skipped(input);
                }

                let result = task(input.clone()).await;
                self.pace().await;

                match result {
                    Ok(value) => Outcome::Done(value),
                    Err(error) => Outcome::Failed(TaskFailure { input, error }),
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut wave = WaveResult {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Done(value) => wave.succeeded.push(value),
                Outcome::Failed(failure) => wave.failed.push(failure),
                Outcome::Skipped(input) => wave.skipped.push(input),
            }
        }
        wave
    }

    async fn pace(&self) {
        let Some(delay) = self.pacing else {
            return;
        };
        let factor: f64 = rand::rng().random_range(0.8..1.2);
        tokio::select! {
            _ = tokio::time::sleep(delay.mul_f64(factor)) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_never_exceeds_worker_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(5, CancellationToken::new());

        let wave = executor
            .run((0..20u64).collect(), |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Uneven latencies.
                    tokio::time::sleep(Duration::from_millis(5 + (i * 7) % 23)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert!(wave.failed.is_empty());
        assert!(wave.is_complete());
        let mut done = wave.succeeded;
        done.sort();
        assert_eq!(done, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_are_tagged_and_isolated() {
        let executor = Executor::new(3, CancellationToken::new());

        let wave = executor
            .run(vec![1u32, 2, 3, 4], |i| async move {
                if i % 2 == 0 {
                    Err(HarvestError::MissingIdentifier(format!("input {i}")))
                } else {
                    Ok(i * 10)
                }
            })
            .await;

        let mut ok = wave.succeeded.clone();
        ok.sort();
        assert_eq!(ok, vec![10, 30]);
        let mut failed: Vec<u32> = wave.failed.iter().map(|f| f.input).collect();
        failed.sort();
        assert_eq!(failed, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_tasks() {
        let cancel = CancellationToken::new();
        let executor = Executor::new(1, cancel.clone());
        let started = Arc::new(AtomicUsize::new(0));

        let wave = executor
            .run(vec![1u32, 2, 3, 4], |i| {
                let cancel = cancel.clone();
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 2 {
                        cancel.cancel();
                    }
                    Ok(i)
                }
            })
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(wave.succeeded.len(), 2);
        assert_eq!(wave.skipped, vec![3, 4]);
        assert!(!wave.is_complete());
    }

    #[tokio::test]
    async fn test_pacing_delays_each_task() {
        let executor =
            Executor::new(1, CancellationToken::new()).with_pacing(Duration::from_millis(20));
        let start = std::time::Instant::now();

        executor
            .run(vec![1u32, 2, 3], |i| async move { Ok(i) })
            .await;

        // Three sequential tasks, each paced by at least 16ms.
        assert!(start.elapsed() >= Duration::from_millis(48));
    }
}
