//! Producer — strategies that turn a [`Config`] into live in-flight work
//!
//! A `Producer` owns the whole concurrency lifecycle of a load run: it spawns
//! pacing tasks and workers on `start`, swaps them out on `update` and tears
//! them down on `stop`. Four strategies are provided:
//!
//! - [`SpawnProducer`]: open-loop, one fresh task per tick. In-flight work grows
//!   without bound when the target is slower than `1 / rate`.
//! - [`PoolProducer`]: open-loop, ticks hand work to idle reusable workers and
//!   only spawn when none is idle. Still unbounded under sustained overload.
//! - [`QueueProducer`]: open-loop with a hard cap. A fixed worker population
//!   drains a bounded token queue that is refilled in one burst per second.
//! - [`WorkerProducer`]: closed-loop, `concurrency` workers issuing requests
//!   back-to-back. The rate is ignored.
//!
//! # Generations
//! Every set of tasks spawned for one configuration period belongs to a
//! [`Generation`]. The producer keeps the sending half of a
//! `watch::channel(false)` and each task keeps an [`ExecutionContext`] with the
//! receiving half. Cancelling (or dropping) the generation flips the flag and
//! every task observes it at its next suspension point. A request that has
//! already started is never interrupted.
//!
//! # Lifecycle
//! ```text
//! Idle --start--> Running --update--> Running --stop--> Stopped
//! ```
//! Calls outside of this sequence are rejected with
//! [`ProducerError::InvalidTransition`] and leave the producer untouched.
//! All operations take `&mut self`, so two reconfigurations can never overlap
//! on the same instance.
//!
//! All operations spawn Tokio tasks and must be called from within a runtime.
pub mod pool;
pub mod queue;
pub mod spawn;
pub mod worker;

pub use pool::PoolProducer;
pub use queue::QueueProducer;
pub use spawn::SpawnProducer;
pub use worker::WorkerProducer;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::watch::{Receiver, Sender, channel};

use crate::{config::Config, requester::Requester};

/// A request-production strategy.
///
/// Implementations decide how a [`Config`] becomes concurrent work issued
/// against their [`Requester`]. The expected call pattern is one `start`, any
/// number of `update`s and one `stop`.
pub trait Producer: Send {
    /// Begin producing load under the current (possibly zero) configuration.
    fn start(&mut self) -> Result<(), ProducerError>;

    /// Replace the active configuration.
    ///
    /// Afterwards exactly one pacing mechanism is running for the new config.
    fn update(&mut self, config: Config) -> Result<(), ProducerError>;

    /// Halt all work initiated by this producer.
    ///
    /// Returns once every task has been signalled. Requests already in flight
    /// may complete after this returns, but no new request is started.
    fn stop(&mut self) -> Result<(), ProducerError>;

    /// Short strategy name used in logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProducerError {
    /// The operation is not allowed from the producer's current state.
    #[error("cannot {op} a producer that is {state}")]
    InvalidTransition { op: &'static str, state: Lifecycle },
}

/// Lifecycle state shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl Lifecycle {
    /// `Idle -> Running`
    pub(crate) fn start(&mut self) -> Result<(), ProducerError> {
        self.transition("start", Lifecycle::Idle, Lifecycle::Running)
    }

    /// `Running -> Running`
    pub(crate) fn update(&mut self) -> Result<(), ProducerError> {
        self.transition("update", Lifecycle::Running, Lifecycle::Running)
    }

    /// `Running -> Stopped`
    pub(crate) fn stop(&mut self) -> Result<(), ProducerError> {
        self.transition("stop", Lifecycle::Running, Lifecycle::Stopped)
    }

    fn transition(
        &mut self,
        op: &'static str,
        from: Lifecycle,
        to: Lifecycle,
    ) -> Result<(), ProducerError> {
        if *self != from {
            tracing::warn!("Rejected {} while producer is {}", op, self);
            return Err(ProducerError::InvalidTransition { op, state: *self });
        }
        *self = to;
        Ok(())
    }
}

/// Cancellation handle for one cohort of tasks.
///
/// Dropping the handle cancels the cohort, so replacing an
/// `Option<Generation>` field is enough to tear the previous one down.
#[derive(Debug)]
pub struct Generation {
    shutdown: Sender<bool>,
}

impl Generation {
    pub fn new() -> (Self, ExecutionContext) {
        let (tx, rx) = channel(false);
        (Self { shutdown: tx }, ExecutionContext { shutdown: rx })
    }

    /// Signal every task of this generation to exit.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        // send_replace succeeds even when every task already exited
        self.shutdown.send_replace(true);
    }
}

/// Task-side view of a [`Generation`].
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    shutdown: Receiver<bool>,
}

impl ExecutionContext {
    /// Non-blocking check, used by workers before starting a new request.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Completes once the generation is cancelled.
    pub async fn cancelled(&mut self) {
        // An error means the sender is gone, which is also a cancellation
        let _ = self.shutdown.wait_for(|b| *b).await;
    }
}

/// Interval between two ticks of a rate-paced strategy.
///
/// `None` for a zero rate. Rates above one billion per second are clamped to
/// one tick per nanosecond.
pub(crate) fn tick_period(rate_per_second: u32) -> Option<Duration> {
    if rate_per_second == 0 {
        return None;
    }
    Some((Duration::from_secs(1) / rate_per_second).max(Duration::from_nanos(1)))
}

/// Which strategy to build, as named in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    Spawn,
    Pool,
    Queue,
    Worker,
}

impl ProducerKind {
    /// Build the strategy with its default tuning.
    pub fn build<R: Requester>(self, requester: Arc<R>) -> Box<dyn Producer> {
        match self {
            ProducerKind::Spawn => Box::new(SpawnProducer::new(requester)),
            ProducerKind::Pool => Box::new(PoolProducer::builder().requester(requester).build()),
            ProducerKind::Queue => Box::new(QueueProducer::builder().requester(requester).build()),
            ProducerKind::Worker => Box::new(WorkerProducer::new(requester)),
        }
    }
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProducerKind::Spawn => "spawn",
            ProducerKind::Pool => "pool",
            ProducerKind::Queue => "queue",
            ProducerKind::Worker => "worker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown producer kind '{0}', expected one of: spawn, pool, queue, worker")]
pub struct UnknownProducerKind(String);

impl FromStr for ProducerKind {
    type Err = UnknownProducerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spawn" => Ok(ProducerKind::Spawn),
            "pool" => Ok(ProducerKind::Pool),
            "queue" => Ok(ProducerKind::Queue),
            "worker" => Ok(ProducerKind::Worker),
            _ => Err(UnknownProducerKind(s.to_string())),
        }
    }
}
