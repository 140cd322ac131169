use serde::{Deserialize, Serialize};
use spotlink_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub interval_secs: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl LatencyConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Periodically probes the REST endpoint and keeps running TTFB statistics.
pub struct LatencySampler {
    gateway: Arc<dyn ExchangeGateway>,
    interval: Duration,
    stats: LatencyStats,
}

impl LatencySampler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: &LatencyConfig) -> Self {
        Self {
            gateway,
            interval: config.interval(),
            stats: LatencyStats::new(),
        }
    }

    pub fn stats(&self) -> &LatencyStats {
        &self.stats
    }

    /// Take one sample. A failed probe leaves the statistics untouched.
    pub async fn sample_once(&mut self) -> Result<Duration, GatewayError> {
        match self.gateway.probe().await {
            Ok(ttfb) => {
                self.stats.record(ttfb);
                log_stats(&self.stats);
                Ok(ttfb)
            }
            Err(e) => {
                warn!(error = %e, samples = self.stats.count, "Latency probe failed, sample discarded");
                Err(e)
            }
        }
    }

    /// Sample immediately and then on every interval until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> LatencyStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Latency sampling started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let _ = self.sample_once().await;
                }
            }
        }
        info!(samples = self.stats.count, "Latency sampling stopped");
        self.stats
    }
}

fn nanos_to_ms(ns: u128) -> f64 {
    ns as f64 / 1_000_000.0
}

fn log_stats(stats: &LatencyStats) {
    let (Some(mean), Some(min), Some(max)) = (stats.mean_ns(), stats.min_ns, stats.max_ns) else {
        return;
    };
    info!(
        samples = stats.count,
        mean_ns = mean as u64,
        min_ns = min as u64,
        max_ns = max as u64,
        "TTFB mean {:.3}ms, min {:.3}ms, max {:.3}ms",
        nanos_to_ms(mean),
        nanos_to_ms(min),
        nanos_to_ms(max)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;

    fn sampler(gateway: Arc<ScriptedGateway>) -> LatencySampler {
        LatencySampler::new(gateway, &LatencyConfig::default())
    }

    #[tokio::test]
    async fn test_samples_update_running_stats() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.script_probes(vec![
            Ok(Duration::from_nanos(10)),
            Ok(Duration::from_nanos(30)),
            Ok(Duration::from_nanos(20)),
        ]);
        let mut sampler = sampler(gateway);
        for _ in 0..3 {
            sampler.sample_once().await.unwrap();
        }
        let stats = sampler.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ns, Some(10));
        assert_eq!(stats.max_ns, Some(30));
        assert_eq!(stats.mean_ns(), Some(20));
    }

    #[tokio::test]
    async fn test_failed_probe_leaves_stats_unchanged() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.script_probes(vec![
            Ok(Duration::from_nanos(10)),
            Err(GatewayError::Transport("timed out".to_string())),
            Ok(Duration::from_nanos(30)),
        ]);
        let mut sampler = sampler(gateway);

        sampler.sample_once().await.unwrap();
        let before = sampler.stats().clone();
        assert!(sampler.sample_once().await.is_err());
        assert_eq!(sampler.stats(), &before);

        sampler.sample_once().await.unwrap();
        assert_eq!(sampler.stats().count, 2);
        assert_eq!(sampler.stats().mean_ns(), Some(20));
    }

    #[tokio::test]
    async fn test_first_sample_seeds_min_and_max() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.script_probes(vec![Ok(Duration::from_millis(250))]);
        let mut sampler = sampler(gateway);
        sampler.sample_once().await.unwrap();
        assert_eq!(sampler.stats().min_ns, Some(250_000_000));
        assert_eq!(sampler.stats().max_ns, Some(250_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_samples_immediately_then_on_interval() {
        let gateway = Arc::new(ScriptedGateway::new());
        let sampler = sampler(gateway.clone());
        let (trigger, signal) = shutdown_channel();
        let handle = tokio::spawn(sampler.run(signal));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.probe_calls(), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.probe_calls(), 3);

        trigger.trigger();
        let stats = handle.await.unwrap();
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn test_nanos_to_ms() {
        assert_eq!(nanos_to_ms(1_500_000), 1.5);
    }
}
