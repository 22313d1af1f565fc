use serde::{Deserialize, Serialize};

/// Snapshot of the load a producer should generate.
///
/// Passed by value on every reconfiguration. Rate-paced strategies only read
/// `rate_per_second`; [`crate::producer::WorkerProducer`] only reads
/// `concurrency`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target arrival rate. Zero means no pacing task runs.
    pub rate_per_second: u32,
    /// Number of concurrent closed-loop workers.
    pub concurrency: usize,
}

impl Config {
    pub fn new(rate_per_second: u32, concurrency: usize) -> Self {
        Self {
            rate_per_second,
            concurrency,
        }
    }

    /// A config for the rate-paced strategies.
    pub fn rate(rate_per_second: u32) -> Self {
        Self::new(rate_per_second, 0)
    }

    /// A config for the closed-loop strategy.
    pub fn concurrency(concurrency: usize) -> Self {
        Self::new(0, concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_zero() {
        let config: Config = serde_json::from_str(r#"{"rate_per_second": 10}"#).unwrap();
        assert_eq!(config, Config::rate(10));

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn negative_rate_is_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"rate_per_second": -1}"#).is_err());
    }
}
