//! Where cluster records come from.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cluster::ClusterRecord;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read cluster records from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster records in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Produces the current set of cluster records on every call.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list(&self) -> Result<Vec<ClusterRecord>, SourceError>;
}

/// Reads a YAML (or JSON) list of cluster records from disk on every call.
#[derive(Debug, Clone)]
pub struct FileClusterSource {
    path: PathBuf,
}

impl FileClusterSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ClusterSource for FileClusterSource {
    async fn list(&self) -> Result<Vec<ClusterRecord>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;

        // an empty file means no clusters
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_yaml::from_str(&raw).map_err(|source| SourceError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// Fixed in-memory list.
#[derive(Debug, Clone, Default)]
pub struct StaticClusterSource {
    clusters: Vec<ClusterRecord>,
}

impl StaticClusterSource {
    pub fn new(clusters: Vec<ClusterRecord>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl ClusterSource for StaticClusterSource {
    async fn list(&self) -> Result<Vec<ClusterRecord>, SourceError> {
        Ok(self.clusters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_file_source_reads_yaml_list() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
- name: foo
  namespace: org-acme
  labels:
    release.giantswarm.io/version: "19.5.0"
- name: bar
  paused: true
"#
        )
        .unwrap();

        let clusters = FileClusterSource::new(file.path()).list().await.unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].key().to_string(), "org-acme/foo");
        assert!(clusters[1].is_paused());
    }

    #[tokio::test]
    async fn test_file_source_reads_json_list() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "foo", "ownerPaused": true}}]"#).unwrap();

        let clusters = FileClusterSource::new(file.path()).list().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].owner_paused);
    }

    #[tokio::test]
    async fn test_empty_file_has_no_clusters() {
        let file = NamedTempFile::new().unwrap();
        let clusters = FileClusterSource::new(file.path()).list().await.unwrap();
        assert!(clusters.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileClusterSource::new(dir.path().join("missing.yaml"))
            .list()
            .await;
        assert!(matches!(result, Err(SourceError::Io { .. })));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "name: [unterminated").unwrap();

        let result = FileClusterSource::new(file.path()).list().await;
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }
}
