use std::{sync::Arc, time::Duration};

use loadgen::{
    BenchmarkRequester, Config, Event, Reporter, ScenarioFile,
    producer::ProducerKind,
    report::{LatencyReport, StdoutReporter},
};
use tracing_subscriber::EnvFilter;

/// Usage: `cargo run --example ramp [scenario.json]`
///
/// Without a file, runs a shortened version of the default ramp so the demo
/// finishes in a few seconds.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let file = match std::env::args().nth(1) {
        Some(path) => ScenarioFile::from_path(path).await?,
        None => ScenarioFile {
            name: "short ramp".to_string(),
            producer: ProducerKind::Queue,
            events: vec![
                Event::set_latency(Duration::from_millis(100)),
                Event::update(Config::rate(10)),
                Event::sleep(Duration::from_secs(2)),
                Event::update(Config::rate(100)),
                Event::sleep(Duration::from_secs(2)),
                Event::update(Config::rate(1000)),
                Event::sleep(Duration::from_secs(2)),
            ],
        },
    };

    let requester = Arc::new(BenchmarkRequester::new());
    file.into_scenario(requester.clone()).run().await?;

    // let the last in-flight requests land
    tokio::time::sleep(requester.latency()).await;

    let report = LatencyReport::from(requester.snapshot().await);
    StdoutReporter.report(&report).await?;
    Ok(())
}
