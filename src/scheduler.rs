use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Work the scheduler fires on every tick.
#[async_trait]
pub trait PollJob: Send + Sync + 'static {
    async fn run_one_cycle(&self);
}

/// Fires a [`PollJob`] on a fixed cadence, never running two cycles at once.
pub struct Scheduler {
    job: Arc<dyn PollJob>,
    period: Duration,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when the cycle task ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(job: Arc<dyn PollJob>, period: Duration) -> Self {
        Self {
            job,
            period,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts a cycle in the background unless one is still in flight, in
    /// which case nothing happens and `None` is returned.
    pub fn fire(&self) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous poll is still running, skipping this tick");
            return None;
        }

        let guard = RunningGuard(self.running.clone());
        let job = self.job.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            if AssertUnwindSafe(job.run_one_cycle())
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Unhandled panic in poll cycle, the scheduler keeps running");
            }
        }))
    }

    /// Ticks until `shutdown` resolves, then waits for the cycle in flight.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Event poller scheduled every {:?}", self.period);

        let mut in_flight: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Some(handle) = self.fire() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = in_flight.filter(|handle| !handle.is_finished()) {
            info!("Waiting for the running poll cycle to finish");
            let _ = handle.await;
        }
    }
}
