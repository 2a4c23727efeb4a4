//! Stack naming contract.
//!
//! The naming function and the deletion guard share the constants below so
//! the two can never drift apart.

use crate::cluster::ClusterRecord;
use std::fmt;

pub const STACK_NAME_PREFIX: &str = "cluster-";

/// Every stack the watchdog may delete carries this suffix.
pub const STACK_NAME_SUFFIX: &str = "-tccpf";

/// Name of a CloudFormation stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackName(String);

impl StackName {
    /// Wrap an arbitrary name. No validation happens here; the deleter checks
    /// the suffix on its own.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `cluster-<name>-tccpf`
    pub fn for_cluster(cluster: &ClusterRecord) -> Self {
        Self(format!(
            "{STACK_NAME_PREFIX}{}{STACK_NAME_SUFFIX}",
            cluster.name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_watchdog_suffix(&self) -> bool {
        self.0.ends_with(STACK_NAME_SUFFIX)
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
