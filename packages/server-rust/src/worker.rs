//! Long-lived maintenance loop driven by a tick interval and on-demand tasks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Pending on-demand tasks beyond this are refused by `submit` back-pressure.
const TASK_QUEUE: usize = 64;

/// Work executed on the worker's own task.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    async fn on_tick(&mut self) {}

    /// Runs once after the loop exits.
    async fn shutdown(&mut self) {}
}

#[derive(Debug, thiserror::Error)]
#[error("background worker is not running")]
pub struct WorkerStopped;

/// Handle to a spawned [`BackgroundRunnable`].
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tasks: Option<mpsc::Sender<R::Task>>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the loop. The first tick fires one full `tick` after start;
    /// ticks missed while a task runs are delayed, not bunched.
    pub fn start(mut runnable: R, tick: Duration) -> Self {
        let (tasks, mut inbox) = mpsc::channel::<R::Task>(TASK_QUEUE);
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stopped.cancelled() => break,
                    task = inbox.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                }
            }
            runnable.shutdown().await;
        });

        Self {
            tasks: Some(tasks),
            stop,
            handle: Some(handle),
        }
    }

    /// Queues a task, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// `WorkerStopped` once the loop has exited or `stop` was called.
    pub async fn submit(&self, task: R::Task) -> Result<(), WorkerStopped> {
        let tasks = self.tasks.as_ref().ok_or(WorkerStopped)?;
        tasks.send(task).await.map_err(|_| WorkerStopped)
    }

    /// Signals the loop and waits for `shutdown` to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        self.tasks = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background worker ended abnormally");
            }
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        fn count(&self, entry: &str) -> usize {
            self.0.lock().iter().filter(|e| *e == entry).count()
        }
    }

    #[async_trait]
    impl BackgroundRunnable for Journal {
        type Task = &'static str;

        async fn run(&mut self, task: &'static str) {
            self.0.lock().push(task.to_string());
        }

        async fn on_tick(&mut self) {
            self.0.lock().push("tick".to_string());
        }

        async fn shutdown(&mut self) {
            self.0.lock().push("shutdown".to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_run_in_order_and_shutdown_runs_last() {
        let journal = Journal::default();
        let mut worker = BackgroundWorker::start(journal.clone(), Duration::from_secs(3600));

        worker.submit("a").await.unwrap();
        worker.submit("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.stop().await;

        assert_eq!(journal.entries(), ["a", "b", "shutdown"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_start_after_one_interval() {
        let journal = Journal::default();
        let mut worker = BackgroundWorker::start(journal.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(journal.count("tick"), 0);

        tokio::time::sleep(Duration::from_secs(21)).await;
        worker.stop().await;
        assert_eq!(journal.count("tick"), 2);
    }

    #[tokio::test]
    async fn submit_after_stop_fails() {
        let mut worker = BackgroundWorker::start(Journal::default(), Duration::from_secs(60));
        worker.stop().await;
        worker.stop().await;
        assert!(worker.submit("late").await.is_err());
    }
}
