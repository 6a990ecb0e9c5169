//! Scatter/gather execution of fallible work batches.
//!
//! The import and render phases both hand the runner an ordered list of
//! units of work; each unit may complete with a value, skip (`Ok(None)`),
//! or fail. Nothing is observable outside the call until the whole batch
//! has settled.

use std::future::Future;
use tokio::task::JoinSet;

use crate::error::StrataError;

/// How a batch executes: strictly one-at-a-time in list order, or fully
/// concurrent on the runtime's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// Everything a settled batch produced: completed (non-skipped) results
/// (in completion order for parallel batches, list order for sequential
/// ones) plus every collected failure.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub completed: Vec<T>,
    pub failures: Vec<StrataError>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        BatchOutcome {
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Executes a batch of fallible, possibly-skip-producing units of work.
#[derive(Debug, Clone, Copy)]
pub struct TaskRunner {
    mode: ExecutionMode,
}

impl TaskRunner {
    pub fn new(mode: ExecutionMode) -> Self {
        TaskRunner { mode }
    }

    /// Pick parallel unless the caller asked for deterministic sequential
    /// execution (the debugging override).
    pub fn for_build(serialize: bool) -> Self {
        if serialize {
            TaskRunner::new(ExecutionMode::Sequential)
        } else {
            TaskRunner::new(ExecutionMode::Parallel)
        }
    }

    pub async fn run<T, F>(&self, tasks: Vec<F>) -> BatchOutcome<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<Option<T>, StrataError>> + Send + 'static,
    {
        let mut outcome = BatchOutcome::default();
        match self.mode {
            ExecutionMode::Sequential => {
                for task in tasks {
                    match task.await {
                        Ok(Some(value)) => outcome.completed.push(value),
                        Ok(None) => {}
                        Err(e) => outcome.failures.push(e),
                    }
                }
            }
            ExecutionMode::Parallel => {
                let mut set = JoinSet::new();
                for task in tasks {
                    set.spawn(task);
                }
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(Ok(Some(value))) => outcome.completed.push(value),
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => outcome.failures.push(e),
                        Err(join_error) => outcome.failures.push(join_error.into()),
                    }
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn sequential_preserves_list_order() {
        let runner = TaskRunner::new(ExecutionMode::Sequential);
        let tasks: Vec<_> = (0..5)
            .map(|i| async move { Ok::<_, StrataError>(Some(i)) })
            .collect();
        let outcome = runner.run(tasks).await;
        assert_eq!(outcome.completed, vec![0, 1, 2, 3, 4]);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn sequential_runs_one_at_a_time() {
        let runner = TaskRunner::new(ExecutionMode::Sequential);
        let active = Arc::new(Mutex::new(()));
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let active = active.clone();
                async move {
                    // A second concurrent unit would block here forever.
                    let guard = active.try_lock().map_err(|_| {
                        StrataError::Internal("sequential batch overlapped".into())
                    })?;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    drop(guard);
                    Ok(Some(i))
                }
            })
            .collect();
        let outcome = runner.run(tasks).await;
        assert_eq!(outcome.completed.len(), 3);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn parallel_collects_all_completions() {
        let runner = TaskRunner::new(ExecutionMode::Parallel);
        let tasks: Vec<_> = (0..16u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(16 - i)).await;
                Ok::<_, StrataError>(Some(i))
            })
            .collect();
        let mut outcome = runner.run(tasks).await;
        outcome.completed.sort();
        assert_eq!(outcome.completed, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn skips_and_failures_are_separated() {
        let runner = TaskRunner::new(ExecutionMode::Sequential);
        let tasks: Vec<_> = (0..6)
            .map(|i| async move {
                match i % 3 {
                    0 => Ok(Some(i)),
                    1 => Ok(None),
                    _ => Err(StrataError::import(format!("file-{i}"), "boom")),
                }
            })
            .collect();
        let outcome = runner.run(tasks).await;
        assert_eq!(outcome.completed, vec![0, 3]);
        assert_eq!(outcome.failures.len(), 2);
    }
}
