//! loadgen — a synthetic load generator with swappable request-production strategies.
//!
//! loadgen issues a stream of abstract requests against a pluggable target at a
//! given rate and/or concurrency, and lets that configuration change while the
//! run is live without leaking tasks or losing the ability to stop cleanly.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Requester`]: the unit of work. It completes one request per call and can be
//!   told to simulate a given latency. [`BenchmarkRequester`] is a built-in
//!   implementation that only waits and records what it saw.
//! - [`Producer`]: turns a [`Config`] into live concurrent work. Four strategies
//!   are provided and they differ in throughput model, resource growth and
//!   backpressure (see [`producer`]).
//! - [`Scenario`]: drives `start`, a timeline of [`scenario::Event`]s and `stop`
//!   against one producer.
//! - [`LatencyAggregate`] and [`report::LatencyReport`]: what a run measured,
//!   and the derived figures a [`Reporter`] prints.
//!
//! # Example
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use loadgen::{
//!     BenchmarkRequester, Config, Producer, Reporter,
//!     producer::SpawnProducer,
//!     report::{LatencyReport, StdoutReporter},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let requester = Arc::new(BenchmarkRequester::with_latency(Duration::from_millis(5)));
//!     let mut producer = SpawnProducer::new(requester.clone());
//!
//!     producer.start().unwrap();
//!     producer.update(Config::rate(100)).unwrap();
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//!     producer.stop().unwrap();
//!
//!     let report = LatencyReport::from(requester.snapshot().await);
//!     StdoutReporter.report(&report).await.unwrap();
//! }
//! ```
//!
//! # Feature flags
//! - `internals`: expose the idle worker pool and token queue primitives used by
//!   the pooled and queued strategies. Unstable.

/// Latency aggregation
pub mod aggregate;
/// Load configuration snapshots
pub mod config;
/// Request-production strategies
pub mod producer;
/// Reports and Reporters
pub mod report;
/// The unit of work producers dispatch into
pub mod requester;
/// Timelines of configuration changes
pub mod scenario;

pub use aggregate::LatencyAggregate;
pub use config::Config;
pub use producer::{Producer, ProducerError, ProducerKind};
pub use report::Reporter;
pub use requester::{BenchmarkRequester, Requester};
pub use scenario::{Event, Scenario, ScenarioError, ScenarioFile};
