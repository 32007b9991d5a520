//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the orchestrator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

/// Async fixed-period timer. Boundaries are anchored to the first tick so the
/// schedule does not drift with the time spent between ticks.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    /// Timer whose late ticks are delayed, used for simulator ticks.
    pub fn new(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Delay)
    }

    /// Timer that drops missed boundaries and waits for the next aligned one.
    pub fn aligned(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Skip)
    }

    fn with_behavior(period: Duration, behavior: MissedTickBehavior) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(behavior);
        Self { interval }
    }

    /// Wait for the next boundary and return its scheduled instant.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Restart the schedule so the next boundary is one full period from now.
    pub fn reset(&mut self) {
        self.interval.reset();
    }
}

/// Keyed set of spawned tasks joined as a barrier. Every key yields exactly one
/// result, including tasks that panicked.
#[derive(Debug)]
pub struct FanOut<K, T> {
    tasks: Vec<(K, JoinHandle<T>)>,
}

impl<K, T> Default for FanOut<K, T> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<K, T> FanOut<K, T>
where
    T: Send + 'static,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Vec::with_capacity(capacity),
        }
    }

    pub fn spawn<F>(&mut self, key: K, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.tasks.push((key, tokio::spawn(fut)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await every task concurrently and return results in spawn order.
    pub async fn join(self) -> Vec<(K, Result<T, JoinError>)> {
        let (keys, handles): (Vec<K>, Vec<JoinHandle<T>>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        keys.into_iter().zip(results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn aligned_limiter_keeps_boundaries() {
        let mut limiter = RateLimiter::aligned(Duration::from_secs(30));
        let first = limiter.tick().await;
        tokio::time::sleep(Duration::from_secs(7)).await;
        let second = limiter.tick().await;
        assert_eq!(second - first, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn aligned_limiter_skips_missed_boundaries() {
        let mut limiter = RateLimiter::aligned(Duration::from_secs(10));
        let first = limiter.tick().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        // The overdue boundary fires once, then the schedule realigns.
        let overdue = limiter.tick().await;
        assert_eq!(overdue - first, Duration::from_secs(10));
        let next = limiter.tick().await;
        assert_eq!(next - first, Duration::from_secs(30));
    }

    async fn explode() -> u32 {
        panic!("boom")
    }

    #[tokio::test]
    async fn fan_out_yields_one_result_per_key() {
        let mut fan_out = FanOut::with_capacity(3);
        fan_out.spawn(1u32, async { 10u32 });
        fan_out.spawn(2u32, explode());
        fan_out.spawn(3u32, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            30u32
        });
        assert_eq!(fan_out.len(), 3);

        let results = fan_out.join().await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, 1);
        assert_eq!(*results[0].1.as_ref().unwrap(), 10);
        assert!(results[1].1.as_ref().unwrap_err().is_panic());
        assert_eq!(*results[2].1.as_ref().unwrap(), 30);
    }
}
