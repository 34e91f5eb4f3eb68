//! Cancellable background work
//!
//! [`PollTask`] owns one spawned tokio task and aborts it on `stop` or drop,
//! so no loop outlives the engine that started it. [`TokioClock`] reads
//! wall-clock time off tokio's clock, which makes paused-time tests a
//! complete fake clock: sleeping 90 seconds moves both timers and `now()`.

use capsule_core::Clock;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A named, cancellable background task
#[derive(Debug)]
pub struct PollTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl PollTask {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `tick` every `period`, first tick immediately, until it breaks.
    /// Replaces any task already running.
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let name = self.name;
        self.start_with(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await.is_break() {
                    tracing::debug!(task = name, "poll task finished");
                    break;
                }
            }
        });
    }

    /// Run an arbitrary future as this task.
    pub fn start_with<Fut>(&mut self, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(fut));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wall clock derived from tokio time
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_wall: DateTime<Utc>,
    base_instant: Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock reading `wall` right now and advancing with tokio time.
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            base_wall: wall,
            base_instant: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.base_instant);
        self.base_wall + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// How long until `at` by `clock`, zero when already past.
pub fn delay_until(clock: &dyn Clock, at: DateTime<Utc>) -> Duration {
    (at - clock.now()).to_std().unwrap_or(Duration::ZERO)
}
