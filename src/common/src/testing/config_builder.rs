//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{ClassifierPolicy, Configuration};

/// Builder for creating test configurations.
///
/// Provides a fluent API for creating configurations suitable for testing,
/// with sensible defaults that can be customized as needed.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .fast_timers()
///     .with_classifier(ClassifierPolicy::ResourceCompleteness)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Create a new builder starting from the production defaults.
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Shrink every timer so scheduler tests run in milliseconds.
    pub fn fast_timers(mut self) -> Self {
        let watchdog = &mut self.config.watchdog;
        watchdog.cycle_timeout = Duration::from_secs(5);
        watchdog.resync_interval = Duration::from_millis(500);
        watchdog.deletion_recheck_interval = Duration::from_millis(100);
        watchdog.tick_interval = Duration::from_millis(10);
        watchdog.backoff.initial = Duration::from_millis(50);
        watchdog.backoff.max = Duration::from_millis(400);
        self.config.aws.call_timeout = Duration::from_secs(1);
        self
    }

    /// Select the staleness strategy.
    pub fn with_classifier(mut self, policy: ClassifierPolicy) -> Self {
        self.config.watchdog.classifier = policy;
        self
    }

    /// Force the legacy eligibility gate on or off.
    pub fn with_eligibility(mut self, enabled: bool) -> Self {
        self.config.watchdog.eligibility.enabled = Some(enabled);
        self
    }

    /// Set the eligibility threshold version.
    pub fn with_threshold(mut self, threshold: &str) -> Self {
        self.config.watchdog.eligibility.threshold = threshold.to_string();
        self
    }

    /// Enable or disable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.watchdog.dry_run = dry_run;
        self
    }

    /// Set the cycle deadline.
    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.config.watchdog.cycle_timeout = timeout;
        self
    }

    /// Set the cluster source path.
    pub fn with_clusters_path(mut self, path: &str) -> Self {
        self.config.clusters.path = path.to_string();
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_match_configuration_defaults() {
        let config = TestConfigBuilder::new().build();
        assert_eq!(config.watchdog.classifier, ClassifierPolicy::RouteCount);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_fast_timers_stay_valid() {
        let config = TestConfigBuilder::new().fast_timers().build();
        assert_eq!(config.watchdog.tick_interval, Duration::from_millis(10));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_policy_and_gate_overrides() {
        let config = TestConfigBuilder::new()
            .with_classifier(ClassifierPolicy::ResourceCompleteness)
            .with_eligibility(false)
            .with_threshold("21.0.0")
            .dry_run(true)
            .with_clusters_path("/tmp/clusters.yaml")
            .build();

        assert_eq!(
            config.watchdog.classifier,
            ClassifierPolicy::ResourceCompleteness
        );
        assert!(
            !config
                .watchdog
                .eligibility
                .is_required(config.watchdog.classifier)
        );
        assert_eq!(config.watchdog.eligibility.threshold, "21.0.0");
        assert!(config.watchdog.dry_run);
        assert_eq!(config.clusters.path, "/tmp/clusters.yaml");
    }
}
