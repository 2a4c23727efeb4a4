use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Configuration file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tccpf-watchdog.toml";

/// Prefix for environment overrides, nested keys are separated by `__`.
///
/// Example: `TCCPF_WATCHDOG__WATCHDOG__DRY_RUN=true`
pub const ENV_PREFIX: &str = "TCCPF_WATCHDOG__";

/// Which staleness strategy a deployment runs.
///
/// The strategy is fixed for the lifetime of the process; it is never chosen
/// per cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierPolicy {
    /// Stale once the template declares no route resources.
    #[default]
    RouteCount,
    /// Stale once the declared and the completed resource sets diverge.
    ResourceCompleteness,
}

impl ClassifierPolicy {
    /// Whether the legacy eligibility gate applies when not configured explicitly.
    pub fn requires_legacy_eligibility(self) -> bool {
        matches!(self, ClassifierPolicy::ResourceCompleteness)
    }
}

impl std::fmt::Display for ClassifierPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClassifierPolicy::RouteCount => "route_count",
            ClassifierPolicy::ResourceCompleteness => "resource_completeness",
        };
        write!(f, "{s}")
    }
}

/// Settings for the provisioning service session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Region used when a cluster record does not carry its own.
    ///
    /// Env: TCCPF_WATCHDOG__AWS__REGION
    #[serde(default)]
    pub region: Option<String>,
    /// Role assumed for every cluster that does not name its own role.
    ///
    /// Env: TCCPF_WATCHDOG__AWS__ROLE_ARN
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Upper bound for a single provisioning-service call.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            role_arn: None,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Legacy eligibility gate settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Force the gate on or off. Unset means "follow the classifier policy".
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Label carrying the cluster's release version.
    pub version_label: String,
    /// Clusters strictly below this version are eligible.
    pub threshold: String,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            version_label: "release.giantswarm.io/version".to_string(),
            threshold: "20.0.0-alpha1".to_string(),
        }
    }
}

impl EligibilityConfig {
    /// Resolve whether the gate is active for the given policy.
    pub fn is_required(&self, policy: ClassifierPolicy) -> bool {
        self.enabled
            .unwrap_or_else(|| policy.requires_legacy_eligibility())
    }
}

/// Exponential backoff applied by the scheduler to transient failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Engine and scheduling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Staleness strategy for this deployment.
    pub classifier: ClassifierPolicy,
    /// Resource type counted by the route-count strategy.
    pub route_resource_type: String,
    /// Run every check but skip the two mutating calls.
    pub dry_run: bool,
    /// Deadline for one full reconcile cycle.
    #[serde(with = "humantime_serde")]
    pub cycle_timeout: Duration,
    /// How often a settled cluster is observed again.
    #[serde(with = "humantime_serde")]
    pub resync_interval: Duration,
    /// Delay before a cluster whose stack was just deleted is observed again.
    #[serde(with = "humantime_serde")]
    pub deletion_recheck_interval: Duration,
    /// How often the scheduler looks for due clusters.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Upper bound of reconciles running at the same time.
    pub max_concurrent_reconciles: usize,
    pub eligibility: EligibilityConfig,
    pub backoff: BackoffConfig,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierPolicy::default(),
            route_resource_type: "AWS::EC2::Route".to_string(),
            dry_run: false,
            cycle_timeout: Duration::from_secs(120),
            resync_interval: Duration::from_secs(300),
            deletion_recheck_interval: Duration::from_secs(60),
            tick_interval: Duration::from_secs(5),
            max_concurrent_reconciles: 4,
            eligibility: EligibilityConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Where cluster records are read from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterSourceConfig {
    /// YAML or JSON file holding a list of cluster records.
    pub path: String,
}

impl Default for ClusterSourceConfig {
    fn default() -> Self {
        Self {
            path: "clusters.yaml".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Provisioning service session settings
    pub aws: AwsConfig,
    /// Engine and scheduler settings
    pub watchdog: WatchdogConfig,
    /// Cluster record source
    pub clusters: ClusterSourceConfig,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive")]
    ZeroDuration { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("max_concurrent_reconciles must be positive")]
    ZeroConcurrency,

    #[error("backoff multiplier must be at least 1.0, got {0}")]
    InvalidBackoffMultiplier(f64),

    #[error("backoff max ({max:?}) is smaller than backoff initial ({initial:?})")]
    BackoffRange { initial: Duration, max: Duration },

    #[error("invalid eligibility threshold {value:?}: {message}")]
    InvalidThreshold { value: String, message: String },
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check the values serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let watchdog = &self.watchdog;

        for (field, value) in [
            ("aws.call_timeout", self.aws.call_timeout),
            ("watchdog.cycle_timeout", watchdog.cycle_timeout),
            ("watchdog.resync_interval", watchdog.resync_interval),
            (
                "watchdog.deletion_recheck_interval",
                watchdog.deletion_recheck_interval,
            ),
            ("watchdog.tick_interval", watchdog.tick_interval),
            ("watchdog.backoff.initial", watchdog.backoff.initial),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if watchdog.route_resource_type.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "watchdog.route_resource_type",
            });
        }
        if watchdog.eligibility.version_label.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "watchdog.eligibility.version_label",
            });
        }
        if self.clusters.path.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "clusters.path",
            });
        }

        if watchdog.max_concurrent_reconciles == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let backoff = &watchdog.backoff;
        if backoff.multiplier.is_nan() || backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(backoff.multiplier));
        }
        if backoff.max < backoff.initial {
            return Err(ConfigError::BackoffRange {
                initial: backoff.initial,
                max: backoff.max,
            });
        }

        semver::Version::parse(&watchdog.eligibility.threshold).map_err(|e| {
            ConfigError::InvalidThreshold {
                value: watchdog.eligibility.threshold.clone(),
                message: e.to_string(),
            }
        })?;

        Ok(())
    }
}
