//! Fixed worker population draining a bounded token queue.
//!
//! Rate generation and request execution are decoupled: a ticker pushes
//! `rate` tokens into the queue once per second and a long-lived population of
//! workers pops one token per request. The worker population caps how many
//! requests can be in flight, whatever the rate.
//!
//! # Backpressure
//! When workers cannot keep up, the queue fills and the ticker's burst blocks
//! on the full queue. Ticks missed while blocked are skipped, so the effective
//! rate plateaus at what the workers can drain instead of growing. The price
//! is bursty timing: a whole second of tokens is enqueued at once.
//!
//! # Token queue
//! The queue is a pair of semaphores. `tokens` counts queued tokens and
//! `slots` counts free capacity. A push takes a slot and adds a token, a pop
//! takes a token and gives back a slot. Permits are forgotten rather than
//! released, so each side only ever grows through the other.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::{
    sync::Semaphore,
    time::{Duration, Instant, MissedTickBehavior, interval_at},
};
use typed_builder::TypedBuilder;

use super::{ExecutionContext, Generation, Lifecycle, Producer, ProducerError};
use crate::{config::Config, requester::Requester};

/// Size of the worker population spawned on `start` by default.
pub const DEFAULT_WORKERS: usize = 10_000;
/// Default capacity of the token queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Upper bound on the token queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Once-per-second token bursts drained by a fixed worker population.
///
/// `start` spawns `workers` long-lived workers under their own generation.
/// `update` only replaces the ticker, so changing the rate never respawns the
/// population. `stop` cancels both and closes the queue. Tokens still queued
/// when the rate changes are kept.
///
/// `concurrency` is ignored; the population size is fixed at construction.
#[derive(TypedBuilder)]
pub struct QueueProducer<R: Requester> {
    requester: Arc<R>,
    /// Number of long-lived worker tasks.
    #[builder(default = DEFAULT_WORKERS)]
    workers: usize,
    /// Maximum number of queued tokens, clamped to `1..=MAX_QUEUE_CAPACITY`.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
    #[builder(default = TokenQueue::new(queue_capacity), setter(skip))]
    queue: TokenQueue,
    #[builder(default, setter(skip))]
    config: Config,
    #[builder(default, setter(skip))]
    state: Lifecycle,
    #[builder(default, setter(skip))]
    ticker: Option<Generation>,
    #[builder(default, setter(skip))]
    population: Option<Generation>,
    #[builder(default, setter(skip))]
    running: Arc<AtomicUsize>,
}

impl<R: Requester> QueueProducer<R> {
    /// Tokens waiting to be picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Workers currently alive.
    pub fn workers_alive(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    fn restart_ticker(&mut self) {
        self.ticker = None;
        let rate = self.config.rate_per_second;
        if rate == 0 {
            tracing::debug!("Rate is zero, not starting ticker");
            return;
        }
        let (generation, ctx) = Generation::new();
        tokio::spawn(token_ticker(ctx, self.queue.clone(), rate));
        self.ticker = Some(generation);
    }

    fn spawn_population(&mut self) {
        let (generation, ctx) = Generation::new();
        tracing::info!("Spawning {} queue workers...", self.workers);
        for i in 0..self.workers {
            tokio::spawn(queue_worker(
                i,
                ctx.clone(),
                self.queue.clone(),
                self.requester.clone(),
                self.running.clone(),
            ));
        }
        self.population = Some(generation);
    }
}

impl<R: Requester> Producer for QueueProducer<R> {
    fn start(&mut self) -> Result<(), ProducerError> {
        self.state.start()?;
        if self.queue.capacity() != self.queue_capacity {
            tracing::warn!(
                "Queue capacity {} out of range, using {}",
                self.queue_capacity,
                self.queue.capacity()
            );
        }
        tracing::info!(
            "Starting queue producer at {} rps (queue capacity {})",
            self.config.rate_per_second,
            self.queue.capacity()
        );
        self.spawn_population();
        self.restart_ticker();
        Ok(())
    }

    fn update(&mut self, config: Config) -> Result<(), ProducerError> {
        self.state.update()?;
        tracing::info!("Updating queue producer to {} rps", config.rate_per_second);
        self.config = config;
        self.restart_ticker();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProducerError> {
        self.state.stop()?;
        tracing::info!("Stopping queue producer");
        if !self.queue.is_empty() {
            tracing::debug!("Discarding {} queued tokens.", self.queued());
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        if let Some(population) = self.population.take() {
            population.cancel();
        }
        self.queue.close();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "queue"
    }
}

#[cfg(feature = "internals")]
pub use internals::*;
use internals::*;

mod internals {
    use super::*;

    /// Bounded multi-consumer queue of request tokens.
    #[derive(Clone, Debug)]
    pub struct TokenQueue {
        tokens: Arc<Semaphore>,
        slots: Arc<Semaphore>,
        capacity: usize,
    }

    impl TokenQueue {
        /// A zero capacity still holds one token, so pushes cannot block forever.
        pub fn new(capacity: usize) -> Self {
            let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
            Self {
                tokens: Arc::new(Semaphore::new(0)),
                slots: Arc::new(Semaphore::new(capacity)),
                capacity,
            }
        }

        pub fn capacity(&self) -> usize {
            self.capacity
        }

        /// Enqueue one token, waiting while the queue is full.
        ///
        /// Returns `false` once the queue is closed.
        pub async fn push(&self) -> bool {
            match self.slots.acquire().await {
                Ok(slot) => {
                    slot.forget();
                    self.tokens.add_permits(1);
                    true
                }
                Err(_) => false,
            }
        }

        /// Dequeue one token, waiting while the queue is empty.
        ///
        /// Returns `false` once the queue is closed.
        pub async fn pop(&self) -> bool {
            match self.tokens.acquire().await {
                Ok(token) => {
                    token.forget();
                    self.slots.add_permits(1);
                    true
                }
                Err(_) => false,
            }
        }

        pub fn len(&self) -> usize {
            self.tokens.available_permits()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Wake every waiter; later pushes and pops fail.
        pub fn close(&self) {
            self.tokens.close();
            self.slots.close();
        }
    }

    /// Push `rate` tokens in one burst every second.
    pub async fn token_ticker(mut ctx: ExecutionContext, queue: TokenQueue, rate: u32) {
        let main_task = async {
            let period = Duration::from_secs(1);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for _ in 0..rate {
                    if !queue.push().await {
                        return;
                    }
                }
                tracing::debug!("Queued {rate} tokens ({} waiting).", queue.len());
            }
        };

        tokio::select! {
            _ = main_task => {}
            _ = ctx.cancelled() => {
                tracing::debug!("Token ticker received shutdown signal.");
            }
        }
    }

    /// Pop a token, issue a request, repeat until cancelled.
    pub async fn queue_worker<R: Requester>(
        id: usize,
        mut ctx: ExecutionContext,
        queue: TokenQueue,
        requester: Arc<R>,
        running: Arc<AtomicUsize>,
    ) {
        running.fetch_add(1, Ordering::Relaxed);
        loop {
            let got_token = tokio::select! {
                biased;
                _ = ctx.cancelled() => false,
                popped = queue.pop() => popped,
            };
            if !got_token || ctx.is_cancelled() {
                break;
            }
            requester.request().await;
        }
        running.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!("Queue worker {id} shutting down.");
    }
}
