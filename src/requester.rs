//! The unit of work producers dispatch into.
//!
//! Producers never inspect the outcome of a request: [`Requester::request`]
//! has no return value and a failed request looks exactly like a successful one
//! at this layer. Anything worth measuring is recorded by the requester itself.
use std::{
    future::Future,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use crate::aggregate::LatencyAggregate;

/// Performs one unit of work against the system under test.
///
/// Implementations must be safe to call from any number of tasks at once.
///
/// # Example
/// ```rust
/// use loadgen::Requester;
/// use std::time::Duration;
///
/// struct Noop;
///
/// impl Requester for Noop {
///     async fn request(&self) {}
///     fn set_latency(&self, _: Duration) {}
/// }
/// ```
pub trait Requester: Send + Sync + 'static {
    /// Completes once the unit of work is done.
    ///
    /// Producers never cancel this future; a request that has started always
    /// runs to completion.
    fn request(&self) -> impl Future<Output = ()> + Send;

    /// Simulated latency for requests issued after this call returns.
    fn set_latency(&self, latency: Duration);
}

/// A [`Requester`] that does no real I/O and simply waits for a configurable
/// latency on the Tokio timer.
///
/// The request counter is incremented *before* the wait, the way a transport
/// would count a request as soon as it is sent. The observed latency is added
/// to a [`LatencyAggregate`] once the wait is over.
#[derive(Debug, Default)]
pub struct BenchmarkRequester {
    latency_nanos: AtomicU64,
    requests: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latencies: Mutex<LatencyAggregate>,
}

impl BenchmarkRequester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        let requester = Self::new();
        requester.set_latency(latency);
        requester
    }

    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed))
    }

    /// Requests started so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests currently waiting on their latency.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest in-flight count seen since creation or the last reset.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Restart peak tracking from the current in-flight count.
    pub fn reset_peak(&self) {
        self.peak_in_flight.store(self.in_flight(), Ordering::Relaxed);
    }

    /// Copy of the latencies recorded for completed requests.
    pub async fn snapshot(&self) -> LatencyAggregate {
        self.latencies.lock().await.clone()
    }
}

impl Requester for BenchmarkRequester {
    async fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::Relaxed);

        let start = Instant::now();
        tokio::time::sleep(self.latency()).await;
        let elapsed = start.elapsed();

        self.latencies.lock().await.consume(elapsed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn set_latency(&self, latency: Duration) {
        // saturates after ~584 years
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_nanos.store(nanos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn records_latency_of_completed_requests() {
        let requester = BenchmarkRequester::with_latency(Duration::from_millis(100));
        requester.request().await;
        requester.request().await;

        let agg = requester.snapshot().await;
        assert_eq!(requester.requests(), 2);
        assert_eq!(agg.count, 2);
        assert_eq!(agg.total_latency, Duration::from_millis(200));
        assert_eq!(requester.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_requests_before_they_complete() {
        let requester = Arc::new(BenchmarkRequester::with_latency(Duration::from_secs(1)));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let requester = requester.clone();
                tokio::spawn(async move { requester.request().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(requester.requests(), 3);
        assert_eq!(requester.in_flight(), 3);
        assert_eq!(requester.snapshot().await.count, 0);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(requester.in_flight(), 0);
        assert_eq!(requester.peak_in_flight(), 3);
        assert_eq!(requester.snapshot().await.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_update_applies_to_later_requests() {
        let requester = BenchmarkRequester::new();
        assert_eq!(requester.latency(), Duration::ZERO);

        requester.set_latency(Duration::from_millis(20));
        requester.request().await;
        requester.set_latency(Duration::from_millis(40));
        requester.request().await;

        let agg = requester.snapshot().await;
        assert_eq!(agg.min_latency, Some(Duration::from_millis(20)));
        assert_eq!(agg.max_latency, Duration::from_millis(40));
    }

    #[test]
    fn reset_peak_tracks_current_load() {
        let requester = BenchmarkRequester::new();
        requester.peak_in_flight.store(7, Ordering::Relaxed);
        requester.reset_peak();
        assert_eq!(requester.peak_in_flight(), 0);
    }

    #[test]
    fn huge_latency_saturates() {
        let requester = BenchmarkRequester::new();
        requester.set_latency(Duration::MAX);
        assert_eq!(requester.latency(), Duration::from_nanos(u64::MAX));
    }
}
