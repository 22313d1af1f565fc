//! Open-loop strategy backed by a pool of reusable workers.
//!
//! The ticker owns an `IdlePool` and every worker holds a `PoolReturn`.
//! Both sides share one bounded channel of `Handoff`s: acquiring pops an idle
//! worker's hand-off, releasing pushes it back. A tick with no idle worker
//! spawns a new one.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::{
    sync::mpsc,
    time::{Duration, Instant, MissedTickBehavior, interval_at},
};
use typed_builder::TypedBuilder;

use super::{ExecutionContext, Generation, Lifecycle, Producer, ProducerError, tick_period};
use crate::{config::Config, requester::Requester};

/// How many idle workers are remembered for reuse by default.
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

/// Reusable workers, spawned on demand.
///
/// Same tick cadence as [`super::SpawnProducer`], but each tick first tries
/// to hand the request to an idle worker and only spawns a new one when the
/// idle pool is empty. Workers go back to the pool after every request.
///
/// `pool_capacity` bounds how many *idle* workers are kept, not how many exist:
/// under sustained overload no worker is ever idle, every tick spawns, and the
/// population keeps growing. A worker that finds the pool full on return
/// retires instead of waiting.
///
/// The pool and its workers belong to the current generation and are torn
/// down on every `update`. `concurrency` is ignored.
#[derive(TypedBuilder)]
pub struct PoolProducer<R: Requester> {
    requester: Arc<R>,
    /// Maximum number of idle workers kept for reuse.
    #[builder(default = DEFAULT_POOL_CAPACITY)]
    pool_capacity: usize,
    #[builder(default, setter(skip))]
    config: Config,
    #[builder(default, setter(skip))]
    state: Lifecycle,
    #[builder(default, setter(skip))]
    generation: Option<Generation>,
    #[builder(default, setter(skip))]
    spawned: Arc<AtomicUsize>,
}

impl<R: Requester> PoolProducer<R> {
    /// Workers spawned since the producer was created.
    pub fn workers_spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Replace the ticker, its pool and its workers.
    fn restart_generation(&mut self) {
        self.generation = None;
        let Some(period) = tick_period(self.config.rate_per_second) else {
            tracing::debug!("Rate is zero, not starting ticker");
            return;
        };
        let (generation, ctx) = Generation::new();
        let ticker = PoolTicker {
            ctx,
            requester: self.requester.clone(),
            pool: idle_pool(self.pool_capacity),
            spawned: self.spawned.clone(),
        };
        tokio::spawn(ticker.run(period));
        self.generation = Some(generation);
    }
}

impl<R: Requester> Producer for PoolProducer<R> {
    fn start(&mut self) -> Result<(), ProducerError> {
        self.state.start()?;
        tracing::info!(
            "Starting pool producer at {} rps (pool capacity {})",
            self.config.rate_per_second,
            self.pool_capacity
        );
        self.restart_generation();
        Ok(())
    }

    fn update(&mut self, config: Config) -> Result<(), ProducerError> {
        self.state.update()?;
        tracing::info!("Updating pool producer to {} rps", config.rate_per_second);
        self.config = config;
        self.restart_generation();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProducerError> {
        self.state.stop()?;
        tracing::info!(
            "Stopping pool producer ({} workers spawned in total)",
            self.workers_spawned()
        );
        if let Some(generation) = self.generation.take() {
            generation.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

#[cfg(feature = "internals")]
pub use internals::*;
use internals::*;

/// Idle pool primitives.
mod internals {
    use super::*;

    /// Single-slot hand-off to one idle worker.
    #[derive(Debug)]
    pub struct Handoff(mpsc::Sender<()>);

    impl Handoff {
        pub fn new(wake: mpsc::Sender<()>) -> Self {
            Self(wake)
        }

        /// Wake the worker for one more request.
        ///
        /// Returns `false` if the worker is gone.
        pub fn dispatch(self) -> bool {
            self.0.try_send(()).is_ok()
        }
    }

    /// Acquire side of the idle pool. Owned by the ticker.
    #[derive(Debug)]
    pub struct IdlePool {
        idle: mpsc::Receiver<Handoff>,
        returns: PoolReturn,
    }

    /// Release side of the idle pool. Cloned into every worker.
    #[derive(Clone, Debug)]
    pub struct PoolReturn(mpsc::Sender<Handoff>);

    pub fn idle_pool(capacity: usize) -> IdlePool {
        // mpsc panics on a zero capacity
        let (tx, rx) = mpsc::channel(capacity.max(1));
        IdlePool {
            idle: rx,
            returns: PoolReturn(tx),
        }
    }

    impl IdlePool {
        /// Take an idle worker, if any. Never waits.
        pub fn acquire(&mut self) -> Option<Handoff> {
            self.idle.try_recv().ok()
        }

        pub fn returns(&self) -> PoolReturn {
            self.returns.clone()
        }
    }

    impl PoolReturn {
        /// Put a worker back. Returns `false` when the pool is full.
        pub fn release(&self, handoff: Handoff) -> bool {
            self.0.try_send(handoff).is_ok()
        }
    }

    pub struct PoolTicker<R: Requester> {
        pub ctx: ExecutionContext,
        pub requester: Arc<R>,
        pub pool: IdlePool,
        pub spawned: Arc<AtomicUsize>,
    }

    impl<R: Requester> PoolTicker<R> {
        pub async fn run(mut self, period: Duration) {
            let mut ctx = self.ctx.clone();
            let main_task = async {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    self.dispatch();
                }
            };

            tokio::select! {
                _ = main_task => {}
                _ = ctx.cancelled() => {
                    tracing::debug!("Pool ticker received shutdown signal.");
                }
            }
        }

        /// Hand the tick to an idle worker or spawn a new one.
        fn dispatch(&mut self) {
            while let Some(handoff) = self.pool.acquire() {
                if handoff.dispatch() {
                    return;
                }
            }
            let id = self.spawned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("No idle worker, spawning worker {id}.");
            tokio::spawn(pooled_worker(
                id,
                self.ctx.clone(),
                self.requester.clone(),
                self.pool.returns(),
            ));
        }
    }

    /// Request, return to the pool, wait for the next hand-off. Repeat.
    pub async fn pooled_worker<R: Requester>(
        id: usize,
        mut ctx: ExecutionContext,
        requester: Arc<R>,
        returns: PoolReturn,
    ) {
        let (tx, mut rx) = mpsc::channel(1);
        loop {
            if ctx.is_cancelled() {
                break;
            }
            requester.request().await;

            if !returns.release(Handoff::new(tx.clone())) {
                tracing::debug!("Idle pool full, retiring worker {id}.");
                return;
            }
            tokio::select! {
                // we hold `tx`, so this never yields None
                Some(()) = rx.recv() => {}
                _ = ctx.cancelled() => break,
            }
        }
        tracing::debug!("Worker {id} shutting down.");
    }
}
