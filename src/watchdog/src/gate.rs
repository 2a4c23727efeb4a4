//! Pre-flight filter deciding whether a cluster is processed this cycle.

use semver::Version;
use std::fmt;
use tracing::info;

use crate::cluster::ClusterRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    SkipDeleted,
    SkipPaused,
    SkipNotEligible,
}

impl GateDecision {
    pub fn reason(&self) -> &'static str {
        match self {
            GateDecision::Proceed => "proceed",
            GateDecision::SkipDeleted => "cluster is being deleted",
            GateDecision::SkipPaused => "cluster is paused",
            GateDecision::SkipNotEligible => "cluster is not a legacy cluster",
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Parse a version label leniently.
///
/// Surrounding whitespace and a leading `v` are dropped, leading zeros are
/// removed from the numeric components, and a short core (`19.5`) is padded
/// with zeros. A short core carrying a pre-release or build suffix is left
/// alone and therefore rejected.
pub fn parse_tolerant(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(split);

    let mut parts: Vec<String> = core
        .split('.')
        .map(|part| {
            let stripped = part.trim_start_matches('0');
            if stripped.is_empty() && !part.is_empty() {
                "0".to_string()
            } else {
                stripped.to_string()
            }
        })
        .collect();
    if parts.len() < 3 && rest.is_empty() {
        parts.resize(3, "0".to_string());
    }

    Version::parse(&format!("{}{rest}", parts.join(".")))
}

/// Legacy eligibility test: the version label must parse and be strictly
/// below the threshold.
#[derive(Debug, Clone)]
pub struct Eligibility {
    label: String,
    threshold: Version,
}

impl Eligibility {
    pub fn new(label: impl Into<String>, threshold: Version) -> Self {
        Self {
            label: label.into(),
            threshold,
        }
    }

    pub fn threshold(&self) -> &Version {
        &self.threshold
    }

    /// Missing or malformed labels fail closed.
    pub fn is_eligible(&self, cluster: &ClusterRecord) -> bool {
        let Some(raw) = cluster.label(&self.label) else {
            info!(
                cluster = %cluster.name,
                namespace = %cluster.namespace,
                label = %self.label,
                "Version label missing, treating cluster as not eligible"
            );
            return false;
        };

        match parse_tolerant(raw) {
            Ok(version) => version < self.threshold,
            Err(e) => {
                info!(
                    cluster = %cluster.name,
                    namespace = %cluster.namespace,
                    label = %self.label,
                    version = %raw,
                    error = %e,
                    "Version label unparsable, treating cluster as not eligible"
                );
                false
            }
        }
    }
}

/// Runs the deletion, pause and eligibility checks in that order.
#[derive(Debug, Clone, Default)]
pub struct ClusterGate {
    eligibility: Option<Eligibility>,
}

impl ClusterGate {
    /// `None` disables the eligibility check.
    pub fn new(eligibility: Option<Eligibility>) -> Self {
        Self { eligibility }
    }

    pub fn evaluate(&self, cluster: &ClusterRecord) -> GateDecision {
        if cluster.is_deleting() {
            return GateDecision::SkipDeleted;
        }
        if cluster.is_paused() {
            return GateDecision::SkipPaused;
        }
        if let Some(eligibility) = &self.eligibility {
            if !eligibility.is_eligible(cluster) {
                return GateDecision::SkipNotEligible;
            }
        }
        GateDecision::Proceed
    }
}
