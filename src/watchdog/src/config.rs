//! Immutable engine configuration.

use common::config::{ClassifierPolicy, ConfigError, WatchdogConfig};
use semver::Version;
use std::time::Duration;

use crate::gate::Eligibility;

/// Settings threaded into the reconciler at construction.
///
/// Built once from [`WatchdogConfig`]; the eligibility threshold is parsed
/// here so a bad value fails at startup rather than on the first cluster.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub classifier: ClassifierPolicy,
    pub route_resource_type: String,
    pub dry_run: bool,
    /// Deadline for one reconcile cycle, covering every upstream call.
    pub cycle_timeout: Duration,
    pub deletion_recheck_interval: Duration,
    /// `None` when the eligibility gate is off for this deployment.
    pub eligibility: Option<Eligibility>,
}

impl EngineConfig {
    /// Default timers, no eligibility gate.
    pub fn new(classifier: ClassifierPolicy) -> Self {
        let defaults = WatchdogConfig::default();
        Self {
            classifier,
            route_resource_type: defaults.route_resource_type,
            dry_run: defaults.dry_run,
            cycle_timeout: defaults.cycle_timeout,
            deletion_recheck_interval: defaults.deletion_recheck_interval,
            eligibility: None,
        }
    }

    pub fn with_eligibility(mut self, eligibility: Option<Eligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }
}

impl TryFrom<&WatchdogConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(config: &WatchdogConfig) -> Result<Self, Self::Error> {
        let eligibility = if config.eligibility.is_required(config.classifier) {
            let threshold = Version::parse(&config.eligibility.threshold).map_err(|e| {
                ConfigError::InvalidThreshold {
                    value: config.eligibility.threshold.clone(),
                    message: e.to_string(),
                }
            })?;
            Some(Eligibility::new(
                config.eligibility.version_label.clone(),
                threshold,
            ))
        } else {
            None
        };

        Ok(Self {
            classifier: config.classifier,
            route_resource_type: config.route_resource_type.clone(),
            dry_run: config.dry_run,
            cycle_timeout: config.cycle_timeout,
            deletion_recheck_interval: config.deletion_recheck_interval,
            eligibility,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_follows_policy() {
        let config = WatchdogConfig::default();
        let engine = EngineConfig::try_from(&config).unwrap();
        assert_eq!(engine.classifier, ClassifierPolicy::RouteCount);
        assert!(engine.eligibility.is_none());

        let config = WatchdogConfig {
            classifier: ClassifierPolicy::ResourceCompleteness,
            ..WatchdogConfig::default()
        };
        let engine = EngineConfig::try_from(&config).unwrap();
        let eligibility = engine.eligibility.unwrap();
        assert_eq!(
            eligibility.threshold(),
            &Version::parse("20.0.0-alpha1").unwrap()
        );
    }

    #[test]
    fn test_forced_eligibility() {
        let mut config = WatchdogConfig::default();
        config.eligibility.enabled = Some(true);
        assert!(EngineConfig::try_from(&config).unwrap().eligibility.is_some());

        config.classifier = ClassifierPolicy::ResourceCompleteness;
        config.eligibility.enabled = Some(false);
        assert!(EngineConfig::try_from(&config).unwrap().eligibility.is_none());
    }

    #[test]
    fn test_bad_threshold_rejected_only_when_used() {
        let mut config = WatchdogConfig::default();
        config.eligibility.threshold = "twenty".to_string();
        assert!(EngineConfig::try_from(&config).is_ok());

        config.eligibility.enabled = Some(true);
        assert!(matches!(
            EngineConfig::try_from(&config),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }
}
