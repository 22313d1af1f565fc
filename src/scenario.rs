//! Scenario — a timeline of configuration changes driven against a producer.
//!
//! A [`Scenario`] calls `start` once, runs its [`Event`]s in order on the
//! current task, then calls `stop` once. That is the only call pattern a
//! [`Producer`] has to support.
//!
//! Scenarios can be written by hand with the builder or loaded from JSON:
//!
//! ```json
//! {
//!   "name": "ramp",
//!   "producer": "queue",
//!   "events": [
//!     { "type": "set_latency", "latency_ms": 100 },
//!     { "type": "update", "config": { "rate_per_second": 10 } },
//!     { "type": "sleep", "duration_ms": 60000 }
//!   ]
//! }
//! ```
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc, time::Duration};
use typed_builder::TypedBuilder;

use crate::{
    config::Config,
    producer::{Producer, ProducerError, ProducerKind},
    requester::Requester,
};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error("failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scenario: {0}")]
    Json(#[from] serde_json::Error),
}

/// One step of a scenario timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Change the requester's simulated latency.
    SetLatency {
        #[serde(rename = "latency_ms", with = "millis")]
        latency: Duration,
    },
    /// Reconfigure the producer.
    Update { config: Config },
    /// Let the current configuration run.
    Sleep {
        #[serde(rename = "duration_ms", with = "millis")]
        duration: Duration,
    },
}

impl Event {
    pub fn set_latency(latency: Duration) -> Self {
        Event::SetLatency { latency }
    }

    pub fn update(config: Config) -> Self {
        Event::Update { config }
    }

    pub fn sleep(duration: Duration) -> Self {
        Event::Sleep { duration }
    }

    /// Total time spent sleeping across `events`.
    pub fn total_sleep(events: &[Event]) -> Duration {
        events
            .iter()
            .map(|e| match e {
                Event::Sleep { duration } => *duration,
                _ => Duration::ZERO,
            })
            .sum()
    }
}

/// Durations as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Glue between a producer, the requester it dispatches into and a timeline.
#[derive(TypedBuilder)]
pub struct Scenario<R: Requester> {
    #[builder(setter(into))]
    pub name: String,
    pub producer: Box<dyn Producer>,
    pub requester: Arc<R>,
    #[builder(default)]
    pub events: Vec<Event>,
}

impl<R: Requester> Scenario<R> {
    /// Run the whole timeline. Stops at the first failing operation.
    pub async fn run(&mut self) -> Result<(), ScenarioError> {
        tracing::info!(
            "Running scenario: {} ({} producer, {} events)",
            self.name,
            self.producer.name(),
            self.events.len()
        );
        self.producer.start()?;

        for (i, event) in self.events.iter().enumerate() {
            match *event {
                Event::SetLatency { latency } => self.requester.set_latency(latency),
                Event::Update { config } => self.producer.update(config)?,
                Event::Sleep { duration } => tokio::time::sleep(duration).await,
            }
            tracing::info!("Ran event {i}: {event:?}");
        }

        self.producer.stop()?;
        tracing::info!("Done running scenario: {}!", self.name);
        Ok(())
    }
}

/// Serializable description of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub name: String,
    pub producer: ProducerKind,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl ScenarioFile {
    pub fn from_json_str(s: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(s)?)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw)
    }

    /// 100ms of latency, then 10, 100, 1000 and 10000 rps for a minute each.
    pub fn default_ramp() -> Self {
        let mut events = vec![Event::set_latency(Duration::from_millis(100))];
        for rate in [10, 100, 1_000, 10_000] {
            events.push(Event::update(Config::rate(rate)));
            events.push(Event::sleep(Duration::from_secs(60)));
        }
        Self {
            name: "default ramp".to_string(),
            producer: ProducerKind::Queue,
            events,
        }
    }

    /// Bind the description to a requester.
    pub fn into_scenario<R: Requester>(self, requester: Arc<R>) -> Scenario<R> {
        Scenario::builder()
            .name(self.name)
            .producer(self.producer.build(requester.clone()))
            .requester(requester)
            .events(self.events)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{producer::SpawnProducer, requester::BenchmarkRequester};

    #[test]
    fn parse_scenario_file() {
        let raw = r#"{
            "name": "ramp",
            "producer": "worker",
            "events": [
                { "type": "set_latency", "latency_ms": 100 },
                { "type": "update", "config": { "concurrency": 5 } },
                { "type": "sleep", "duration_ms": 1500 }
            ]
        }"#;
        let file = ScenarioFile::from_json_str(raw).unwrap();
        assert_eq!(file.producer, ProducerKind::Worker);
        assert_eq!(
            file.events,
            vec![
                Event::set_latency(Duration::from_millis(100)),
                Event::update(Config::concurrency(5)),
                Event::sleep(Duration::from_millis(1500)),
            ]
        );
        assert_eq!(Event::total_sleep(&file.events), Duration::from_millis(1500));
    }

    #[test]
    fn reject_unknown_event() {
        let raw = r#"{ "name": "x", "producer": "spawn", "events": [{ "type": "explode" }] }"#;
        assert!(matches!(
            ScenarioFile::from_json_str(raw),
            Err(ScenarioError::Json(_))
        ));
    }

    #[test]
    fn default_ramp_matches_reference_run() {
        let ramp = ScenarioFile::default_ramp();
        assert_eq!(ramp.producer, ProducerKind::Queue);
        assert_eq!(ramp.events.len(), 9);
        assert_eq!(Event::total_sleep(&ramp.events), Duration::from_secs(240));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = ScenarioFile::from_path("/definitely/not/here.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Io(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_zero_then_ten_rps() {
        let requester = Arc::new(BenchmarkRequester::new());
        let mut scenario = Scenario::builder()
            .name("zero then ten")
            .producer(Box::new(SpawnProducer::new(requester.clone())))
            .requester(requester.clone())
            .events(vec![
                Event::set_latency(Duration::from_millis(5)),
                Event::sleep(Duration::from_secs(1)),
                Event::update(Config::rate(10)),
                Event::sleep(Duration::from_millis(1050)),
            ])
            .build();

        scenario.run().await.unwrap();
        assert_eq!(requester.latency(), Duration::from_millis(5));
        assert_eq!(requester.requests(), 10);

        // stopped: no more load
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(requester.requests(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn run_from_file_with_worker_producer() {
        let file = ScenarioFile {
            name: "closed loop".into(),
            producer: ProducerKind::Worker,
            events: vec![
                Event::set_latency(Duration::from_millis(100)),
                Event::update(Config::concurrency(5)),
                Event::sleep(Duration::from_millis(1050)),
            ],
        };
        let requester = Arc::new(BenchmarkRequester::new());
        file.into_scenario(requester.clone()).run().await.unwrap();

        let n = requester.requests();
        assert!((50..=55).contains(&n), "got {n} requests");
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_fails_on_stopped_producer() {
        let requester = Arc::new(BenchmarkRequester::new());
        let mut scenario = Scenario::builder()
            .name("once")
            .producer(ProducerKind::Pool.build(requester.clone()))
            .requester(requester)
            .build();

        scenario.run().await.unwrap();
        assert!(matches!(
            scenario.run().await,
            Err(ScenarioError::Producer(ProducerError::InvalidTransition { .. }))
        ));
    }
}
