//! Open-loop strategy that spawns a new task for every tick.
//!
//! The simplest way to hold a rate: no pooling, no queue, no cap on in-flight
//! work. Useful as a reference point for the other strategies.
use std::sync::Arc;

use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};

use super::{ExecutionContext, Generation, Lifecycle, Producer, ProducerError, tick_period};
use crate::{config::Config, requester::Requester};

/// One fresh task per request.
///
/// A ticker fires every `1 / rate` seconds and each tick spawns a task that
/// issues exactly one request and ends. Nothing bounds the number of tasks in
/// flight: when requests take longer than the tick period, tasks pile up. This
/// is the baseline the other strategies are compared against.
///
/// `concurrency` is ignored.
pub struct SpawnProducer<R: Requester> {
    requester: Arc<R>,
    config: Config,
    state: Lifecycle,
    ticker: Option<Generation>,
}

impl<R: Requester> SpawnProducer<R> {
    pub fn new(requester: Arc<R>) -> Self {
        Self {
            requester,
            config: Config::default(),
            state: Lifecycle::Idle,
            ticker: None,
        }
    }

    /// Replace the ticker, cancelling the previous one first.
    fn restart_ticker(&mut self) {
        self.ticker = None;
        let Some(period) = tick_period(self.config.rate_per_second) else {
            tracing::debug!("Rate is zero, not starting ticker");
            return;
        };
        let (generation, ctx) = Generation::new();
        tokio::spawn(tick_loop(ctx, period, self.requester.clone()));
        self.ticker = Some(generation);
    }
}

impl<R: Requester> Producer for SpawnProducer<R> {
    fn start(&mut self) -> Result<(), ProducerError> {
        self.state.start()?;
        tracing::info!("Starting spawn producer at {} rps", self.config.rate_per_second);
        self.restart_ticker();
        Ok(())
    }

    fn update(&mut self, config: Config) -> Result<(), ProducerError> {
        self.state.update()?;
        tracing::info!("Updating spawn producer to {} rps", config.rate_per_second);
        self.config = config;
        self.restart_ticker();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProducerError> {
        self.state.stop()?;
        tracing::info!("Stopping spawn producer");
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "spawn"
    }
}

async fn tick_loop<R: Requester>(mut ctx: ExecutionContext, period: Duration, requester: Arc<R>) {
    let main_task = async {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let requester = requester.clone();
            tokio::spawn(async move { requester.request().await });
        }
    };

    tokio::select! {
        _ = main_task => {}
        _ = ctx.cancelled() => {
            tracing::debug!("Spawn ticker received shutdown signal.");
        }
    }
}
