//! Polling scheduler driving the reconciler.
//!
//! Each tick lists the cluster records, reconciles the ones that are due
//! with bounded concurrency and stores when each cluster should be looked at
//! again.

use common::config::{BackoffConfig, WatchdogConfig};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::cluster::ClusterKey;
use crate::reconciler::{ReconcileAction, Reconciler};
use crate::source::{ClusterSource, SourceError};

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Backoff {
    /// `initial * multiplier^(failures - 1)`, capped at `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            multiplier: config.multiplier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub resync_interval: Duration,
    pub max_concurrent_reconciles: usize,
    pub backoff: Backoff,
}

impl From<&WatchdogConfig> for SchedulerConfig {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            resync_interval: config.resync_interval,
            max_concurrent_reconciles: config.max_concurrent_reconciles.max(1),
            backoff: Backoff::from(&config.backoff),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClusterSchedule {
    next_due: Instant,
    failures: u32,
}

/// Counts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub listed: usize,
    pub reconciled: usize,
    pub failed: usize,
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    source: Arc<dyn ClusterSource>,
    config: SchedulerConfig,
    schedule: HashMap<ClusterKey, ClusterSchedule>,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn ClusterSource>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reconciler,
            source,
            config,
            schedule: HashMap::new(),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// When `key` is next due, if it has been reconciled before.
    pub fn next_due(&self, key: &ClusterKey) -> Option<Instant> {
        self.schedule.get(key).map(|entry| entry.next_due)
    }

    /// Consecutive transient failures of `key`.
    pub fn failures(&self, key: &ClusterKey) -> u32 {
        self.schedule.get(key).map_or(0, |entry| entry.failures)
    }

    /// Reconcile every due cluster once.
    pub async fn tick(&mut self) -> Result<TickSummary, SourceError> {
        let clusters = self.source.list().await?;
        let listed = clusters.len();

        let present: HashSet<ClusterKey> = clusters.iter().map(|c| c.key()).collect();
        self.schedule.retain(|key, _| present.contains(key));

        let now = Instant::now();
        let mut seen = HashSet::new();
        let due: Vec<_> = clusters
            .into_iter()
            .filter(|cluster| seen.insert(cluster.key()))
            .filter(|cluster| {
                self.schedule
                    .get(&cluster.key())
                    .is_none_or(|entry| entry.next_due <= now)
            })
            .collect();

        if due.is_empty() {
            tracing::debug!(listed, "No cluster due");
            return Ok(TickSummary {
                listed,
                ..TickSummary::default()
            });
        }

        let reconciler = Arc::clone(&self.reconciler);
        let results: Vec<_> = stream::iter(due)
            .map(move |cluster| {
                let reconciler = Arc::clone(&reconciler);
                async move {
                    let result = reconciler.reconcile(&cluster).await;
                    let action = reconciler.action_for(&result);
                    (cluster, result, action)
                }
            })
            .buffer_unordered(self.config.max_concurrent_reconciles)
            .collect()
            .await;

        let mut summary = TickSummary {
            listed,
            reconciled: results.len(),
            failed: 0,
        };

        let now = Instant::now();
        for (cluster, result, action) in results {
            let entry = self
                .schedule
                .entry(cluster.key())
                .or_insert(ClusterSchedule {
                    next_due: now,
                    failures: 0,
                });

            match action {
                ReconcileAction::Done => {
                    entry.failures = 0;
                    entry.next_due = now + self.config.resync_interval;
                }
                ReconcileAction::RequeueAfter(delay) => {
                    entry.failures = 0;
                    entry.next_due = now + delay;
                }
                ReconcileAction::RequeueWithBackoff => {
                    entry.failures = entry.failures.saturating_add(1);
                    let delay = self.config.backoff.delay(entry.failures);
                    entry.next_due = now + delay;
                    summary.failed += 1;

                    if let Err(e) = &result {
                        tracing::warn!(
                            cluster = %cluster.name,
                            namespace = %cluster.namespace,
                            error = %e,
                            failures = entry.failures,
                            retry_in = ?delay,
                            "Reconcile failed, retrying with backoff"
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Tick forever on the configured interval.
    pub async fn run(mut self) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.tick().await {
                Ok(summary) if summary.reconciled > 0 => {
                    tracing::debug!(
                        listed = summary.listed,
                        reconciled = summary.reconciled,
                        failed = summary.failed,
                        "Tick finished"
                    );
                    self.reconciler.metrics().summary().log();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to list cluster records"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        };

        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(20));
        assert_eq!(backoff.delay(4), Duration::from_secs(40));
        assert_eq!(backoff.delay(5), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_constant_backoff() {
        let backoff = Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 1.0,
        };
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_scheduler_config_from_watchdog_config() {
        let config = SchedulerConfig::from(&WatchdogConfig::default());
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(config.backoff.initial, Duration::from_secs(5));
    }
}
