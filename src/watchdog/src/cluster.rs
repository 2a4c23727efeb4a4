//! Read-only view of a cluster record as observed by one reconcile cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation that pauses reconciliation of a cluster.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label carrying the release version of a cluster.
pub const RELEASE_VERSION_LABEL: &str = "release.giantswarm.io/version";

fn default_namespace() -> String {
    "default".to_string()
}

/// Snapshot of a cluster record.
///
/// The record is owned by another system; the watchdog never writes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Set once the owning system started deleting the cluster.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused: bool,
    /// Set when the owning parent object is paused.
    #[serde(default)]
    pub owner_paused: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Region of the cluster's stack, overrides the configured default.
    #[serde(default)]
    pub region: Option<String>,
    /// Role to assume for this cluster's account, overrides the configured default.
    #[serde(default)]
    pub role_arn: Option<String>,
}

impl ClusterRecord {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            deletion_timestamp: None,
            paused: false,
            owner_paused: false,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            region: None,
            role_arn: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_deletion_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(timestamp);
        self
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Paused directly, through the pause annotation, or through its owner.
    pub fn is_paused(&self) -> bool {
        self.paused || self.owner_paused || self.annotations.contains_key(PAUSED_ANNOTATION)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Namespaced identity of a cluster record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
