use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

use crate::aggregate::LatencyAggregate;

/// Final figures derived from a [`LatencyAggregate`].
///
/// Reports are plain data: no I/O happens here, that is the job of a
/// [`Reporter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub count: u64,
    pub average_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub p50_latency: Duration,
    pub p90_latency: Duration,
    pub p99_latency: Duration,
}

impl From<LatencyAggregate> for LatencyReport {
    fn from(value: LatencyAggregate) -> Self {
        let average_latency = if value.count == 0 {
            Duration::ZERO
        } else {
            value.total_latency.div_f64(value.count as f64)
        };
        Self {
            count: value.count,
            average_latency,
            min_latency: value.min_latency.unwrap_or_default(),
            max_latency: value.max_latency,
            p50_latency: value.quantile(0.5),
            p90_latency: value.quantile(0.9),
            p99_latency: value.quantile(0.99),
        }
    }
}

/// Sends a [`LatencyReport`] somewhere: stdout, a file, a metrics backend.
pub trait Reporter {
    fn report(
        &self,
        report: &LatencyReport,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

/// Prints the report as pretty JSON.
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &LatencyReport) -> Result<(), Box<dyn std::error::Error>> {
        let value = serde_json::to_string_pretty(report)?;
        println!("{value}");
        Ok(())
    }
}
