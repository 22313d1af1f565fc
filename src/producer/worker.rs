//! Closed-loop strategy with a fixed number of workers.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::{ExecutionContext, Generation, Lifecycle, Producer, ProducerError};
use crate::{config::Config, requester::Requester};

/// Closed-loop load: `concurrency` workers issuing requests back-to-back.
///
/// There is no pacing at all, throughput is whatever `concurrency` callers can
/// achieve against the requester's latency. `rate_per_second` is ignored.
///
/// `update` cancels the whole population and spawns a new one at the new
/// concurrency.
pub struct WorkerProducer<R: Requester> {
    requester: Arc<R>,
    config: Config,
    state: Lifecycle,
    workers: Option<Generation>,
    running: Arc<AtomicUsize>,
}

impl<R: Requester> WorkerProducer<R> {
    pub fn new(requester: Arc<R>) -> Self {
        Self {
            requester,
            config: Config::default(),
            state: Lifecycle::Idle,
            workers: None,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers currently alive, across generations.
    pub fn workers_alive(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    fn restart_workers(&mut self) {
        self.workers = None;
        let (generation, ctx) = Generation::new();
        tracing::debug!("Spawning {} workers...", self.config.concurrency);
        for i in 0..self.config.concurrency {
            tokio::spawn(closed_loop_worker(
                i,
                ctx.clone(),
                self.requester.clone(),
                self.running.clone(),
            ));
        }
        self.workers = Some(generation);
    }
}

impl<R: Requester> Producer for WorkerProducer<R> {
    fn start(&mut self) -> Result<(), ProducerError> {
        self.state.start()?;
        tracing::info!("Starting worker producer with {} workers", self.config.concurrency);
        self.restart_workers();
        Ok(())
    }

    fn update(&mut self, config: Config) -> Result<(), ProducerError> {
        self.state.update()?;
        tracing::info!("Updating worker producer to {} workers", config.concurrency);
        self.config = config;
        self.restart_workers();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProducerError> {
        self.state.stop()?;
        tracing::info!("Stopping worker producer");
        if let Some(workers) = self.workers.take() {
            workers.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "worker"
    }
}

/// Requests are never cut short: cancellation is only observed between two
/// requests.
async fn closed_loop_worker<R: Requester>(
    id: usize,
    ctx: ExecutionContext,
    requester: Arc<R>,
    running: Arc<AtomicUsize>,
) {
    running.fetch_add(1, Ordering::Relaxed);
    while !ctx.is_cancelled() {
        requester.request().await;
    }
    running.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!("Worker {id} shutting down.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requester::BenchmarkRequester;
    use std::time::Duration;
    use tokio::time::sleep;

    fn producer(latency: Duration) -> (WorkerProducer<BenchmarkRequester>, Arc<BenchmarkRequester>) {
        let requester = Arc::new(BenchmarkRequester::with_latency(latency));
        (WorkerProducer::new(requester.clone()), requester)
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_follows_concurrency() {
        let (mut p, requester) = producer(Duration::from_millis(100));
        p.start().unwrap();
        p.update(Config::new(1000, 5)).unwrap();

        sleep(Duration::from_millis(1050)).await;
        // 5 workers x 10 requests per second each
        let n = requester.requests();
        assert!((50..=55).contains(&n), "got {n} requests");
        assert_eq!(requester.in_flight(), 5);
        assert_eq!(requester.peak_in_flight(), 5);
        p.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_concurrency_is_idle() {
        let (mut p, requester) = producer(Duration::from_millis(10));
        p.start().unwrap();
        p.update(Config::rate(100)).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(requester.requests(), 0);
        assert_eq!(p.workers_alive(), 0);
        p.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn update_replaces_population() {
        let (mut p, requester) = producer(Duration::from_millis(100));
        p.start().unwrap();
        p.update(Config::concurrency(8)).unwrap();
        sleep(Duration::from_millis(550)).await;
        assert_eq!(p.workers_alive(), 8);

        p.update(Config::concurrency(2)).unwrap();
        // old workers finish their current request then exit
        sleep(Duration::from_millis(150)).await;
        assert_eq!(p.workers_alive(), 2);

        requester.reset_peak();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(requester.in_flight(), 2);
        assert_eq!(requester.peak_in_flight(), 2);
        p.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_new_requests_after_stop() {
        let (mut p, requester) = producer(Duration::from_millis(100));
        p.start().unwrap();
        p.update(Config::concurrency(4)).unwrap();
        sleep(Duration::from_millis(250)).await;
        p.stop().unwrap();
        tokio::task::yield_now().await;

        let started = requester.requests();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(requester.requests(), started);
        assert_eq!(p.workers_alive(), 0);
    }
}
