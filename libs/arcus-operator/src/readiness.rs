//! Poll changed units until they report ready instead of sleeping for a fixed period.

use serde::Deserialize;
use std::time::Duration;

use arcus_spawner::Spawner;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    #[serde(with = "arcus_kit::humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "arcus_kit::humantime_serde")]
    pub max_backoff: Duration,
    /// Extra wait after every changed unit is ready.
    #[serde(with = "arcus_kit::humantime_serde")]
    pub settle: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            settle: Duration::ZERO,
        }
    }
}

impl ReadinessPolicy {
    /// Delay before attempt `attempt` (zero-based), doubling from `initial_backoff` up to
    /// `max_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Wait until every unit in `units` is ready. Returns the units that never became ready.
    pub async fn wait_until_ready(&self, spawner: &Spawner, units: &[String]) -> Vec<String> {
        let mut pending: Vec<&String> = units.iter().collect();
        for attempt in 0..self.max_attempts {
            let mut still = Vec::with_capacity(pending.len());
            for unit in pending {
                if !spawner.is_ready(unit).await {
                    still.push(unit);
                }
            }
            pending = still;
            if pending.is_empty() {
                break;
            }
            let delay = self.backoff(attempt);
            tracing::debug!(pending = pending.len(), attempt, delay = ?delay, "Waiting for units to become ready");
            tokio::time::sleep(delay).await;
        }

        if !pending.is_empty() {
            tracing::warn!(units = ?pending, "Units not ready after readiness budget, continuing");
        }
        if !self.settle.is_zero() {
            tracing::info!(settle = ?self.settle, "Waiting for services to settle");
            tokio::time::sleep(self.settle).await;
        }
        pending.into_iter().cloned().collect()
    }
}
