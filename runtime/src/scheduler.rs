//! Fixed-interval background jobs.

use crate::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// A job run on every tick of a [`PeriodicTask`].
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run the job once.
    ///
    /// # Errors
    ///
    /// Any error; it is logged and the next tick runs as usual.
    async fn run_once(&self) -> Result<(), BoxError>;
}

/// Runs a [`PeriodicJob`] every `interval` until shutdown.
///
/// The first run happens immediately. Ticks missed while a run is still in
/// progress are not made up; the schedule slides instead.
pub struct PeriodicTask {
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PeriodicTask {
    /// Create a task.
    #[must_use]
    pub fn new(
        job: Arc<dyn PeriodicJob>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            job,
            interval,
            shutdown,
        }
    }

    /// Spawn the task in the background.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run until the shutdown signal fires.
    pub async fn run(&mut self) {
        let name = self.job.name().to_string();
        info!(job = %name, interval_ms = self.interval.as_millis(), "Periodic job started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(job = %name, "Periodic job received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.job.run_once().await {
                        error!(job = %name, error = %e, "Periodic job run failed");
                    }
                }
            }
        }

        info!(job = %name, "Periodic job stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicJob for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&self) -> Result<(), BoxError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail { Err("nope".into()) } else { Ok(()) }
        }
    }

    async fn run_for(fail: bool) -> usize {
        let job = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            fail,
        });
        let (tx, rx) = broadcast::channel(1);
        let handle =
            PeriodicTask::new(Arc::clone(&job) as Arc<dyn PeriodicJob>, Duration::from_millis(5), rx)
                .spawn();

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
        job.runs.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn runs_repeatedly_until_shutdown() {
        assert!(run_for(false).await >= 2);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_schedule() {
        assert!(run_for(true).await >= 2);
    }
}
