//! Periodic task scheduling
//!
//! Every periodic loop in the engine runs through a [`Schedule`]: a set of
//! tokio tasks driven by `tokio::time::interval` and sharing one
//! cancellation token. Cancelling stops future ticks only; a tick already
//! running is left to finish.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A group of periodic tasks with a shared stop signal
#[derive(Debug, Default)]
pub struct Schedule {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Schedule {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `period`, starting one period from now
    pub fn every<F, Fut>(&mut self, name: &'static str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(schedule = name, period = ?period, "Schedule started");

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                debug!(schedule = name, "Tick");
                task().await;
            }

            info!(schedule = name, "Schedule stopped");
        });

        self.handles.push(handle);
    }

    /// Stop scheduling new ticks
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for every task to exit, including in-flight ticks
    pub async fn shutdown(self) {
        self.stop();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
