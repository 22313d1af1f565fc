use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest latency the histogram tracks, in microseconds (one hour).
/// Longer observations are recorded at this value.
const HIGHEST_TRACKABLE_MICROS: u64 = 3_600_000_000;
/// Decimal digits of precision kept per histogram bucket.
const SIGNIFICANT_FIGURES: u8 = 3;

/// Compact, mergeable record of observed request latencies.
///
/// Like every aggregate it only keeps raw data: totals, bounds and a latency
/// histogram at microsecond resolution. Derived values such as the average or
/// percentiles live in [`crate::report::LatencyReport`].
///
/// `merge` is associative and commutative, so per-task aggregates can be
/// combined in any order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyAggregate {
    pub count: u64,
    pub total_latency: Duration,
    /// `None` until the first observation
    pub min_latency: Option<Duration>,
    pub max_latency: Duration,
    /// Allocated on the first observation
    #[serde(default, with = "histogram_v2")]
    histogram: Option<Histogram<u64>>,
}

impl LatencyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incorporate a single observation.
    pub fn consume(&mut self, latency: Duration) {
        self.count += 1;
        self.total_latency += latency;
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = self.max_latency.max(latency);

        if let Some(histogram) = self.histogram_mut() {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            histogram.saturating_record(micros);
        }
    }

    /// Aggregate several observations at once.
    pub fn aggregate(&mut self, latencies: &[Duration]) {
        latencies.iter().for_each(|l| self.consume(*l));
    }

    /// Combine two aggregates into one.
    pub fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.total_latency += other.total_latency;
        self.min_latency = match (self.min_latency, other.min_latency) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_latency = self.max_latency.max(other.max_latency);

        if let Some(theirs) = other.histogram {
            match self.histogram.as_mut() {
                Some(ours) => {
                    if let Err(e) = ours.add(&theirs) {
                        tracing::warn!("Dropping latency samples while merging: {e}");
                    }
                }
                None => self.histogram = Some(theirs),
            }
        }
    }

    /// Latency below which a `quantile` share of observations fall.
    ///
    /// `quantile` is clamped to `0.0..=1.0`; an empty aggregate yields zero.
    pub fn quantile(&self, quantile: f64) -> Duration {
        self.histogram
            .as_ref()
            .filter(|h| !h.is_empty())
            .map_or(Duration::ZERO, |h| {
                Duration::from_micros(h.value_at_quantile(quantile.clamp(0.0, 1.0)))
            })
    }

    fn histogram_mut(&mut self) -> Option<&mut Histogram<u64>> {
        if self.histogram.is_none() {
            match Histogram::new_with_bounds(1, HIGHEST_TRACKABLE_MICROS, SIGNIFICANT_FIGURES) {
                Ok(histogram) => self.histogram = Some(histogram),
                Err(e) => {
                    tracing::warn!("Cannot allocate latency histogram: {e}");
                    return None;
                }
            }
        }
        self.histogram.as_mut()
    }
}

/// Stores the histogram in HdrHistogram's compact V2 encoding.
mod histogram_v2 {
    use hdrhistogram::{
        Histogram,
        serialization::{Serializer as _, V2Serializer},
    };
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    pub fn serialize<S: Serializer>(
        histogram: &Option<Histogram<u64>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let Some(histogram) = histogram else {
            return serializer.serialize_none();
        };
        let mut buf = Vec::new();
        V2Serializer::new()
            .serialize(histogram, &mut buf)
            .map_err(ser::Error::custom)?;
        serializer.serialize_some(&buf)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Histogram<u64>>, D::Error> {
        let Some(buf) = Option::<Vec<u8>>::deserialize(deserializer)? else {
            return Ok(None);
        };
        hdrhistogram::serialization::Deserializer::new()
            .deserialize(&mut buf.as_slice())
            .map(Some)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// `low..=high`, widened by the histogram's three significant figures.
    fn assert_between(actual: Duration, low: Duration, high: Duration) {
        assert!(
            actual >= low && actual <= high + high / 500,
            "{actual:?} is not in {low:?}..={high:?}"
        );
    }

    #[test]
    fn consume_tracks_bounds() {
        let mut agg = LatencyAggregate::new();
        agg.aggregate(&[ms(30), ms(10), ms(20)]);

        assert_eq!(agg.count, 3);
        assert_eq!(agg.total_latency, ms(60));
        assert_eq!(agg.min_latency, Some(ms(10)));
        assert_eq!(agg.max_latency, ms(30));
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = LatencyAggregate::new();
        a.aggregate(&[ms(5), ms(50)]);
        let mut b = LatencyAggregate::new();
        b.aggregate(&[ms(1)]);
        let empty = LatencyAggregate::new();

        let mut ab = a.clone();
        ab.merge(b.clone());
        ab.merge(empty.clone());

        let mut ba = empty;
        ba.merge(b);
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.count, 3);
        assert_eq!(ab.min_latency, Some(ms(1)));
        assert_eq!(ab.max_latency, ms(50));
    }

    #[test]
    fn quantiles_follow_the_distribution() {
        let mut agg = LatencyAggregate::new();
        agg.aggregate(&(1..=100).map(ms).collect::<Vec<_>>());

        assert_between(agg.quantile(0.5), ms(50), ms(51));
        assert_between(agg.quantile(0.9), ms(90), ms(91));
        assert_between(agg.quantile(0.99), ms(99), ms(100));
        assert_between(agg.quantile(1.0), ms(100), ms(100));
    }

    #[test]
    fn merged_quantiles_cover_both_sides() {
        let mut fast = LatencyAggregate::new();
        fast.aggregate(&vec![ms(10); 90]);
        let mut slow = LatencyAggregate::new();
        slow.aggregate(&vec![ms(1000); 10]);

        fast.merge(slow);
        assert_eq!(fast.count, 100);
        assert_between(fast.quantile(0.5), ms(10), ms(10));
        assert_between(fast.quantile(0.85), ms(10), ms(10));
        assert_between(fast.quantile(0.99), ms(1000), ms(1000));
    }

    #[test]
    fn empty_aggregate_has_zero_quantiles() {
        let agg = LatencyAggregate::new();
        assert_eq!(agg.quantile(0.5), Duration::ZERO);
        assert_eq!(agg.quantile(0.99), Duration::ZERO);
    }

    #[test]
    fn histogram_survives_json() {
        let mut agg = LatencyAggregate::new();
        agg.aggregate(&[ms(10), ms(20), ms(300)]);

        let json = serde_json::to_string(&agg).unwrap();
        let back: LatencyAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, agg);
        assert_eq!(back.quantile(0.99), agg.quantile(0.99));
    }
}
