//! Provisioning-service capability used by the engine.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::cluster::ClusterRecord;
use crate::error::ProviderError;
use crate::key::StackName;

/// Status of a stack or of one of its resources.
///
/// Only the two settled states are distinguished; every transitional or
/// failed state is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    CreateComplete,
    UpdateComplete,
    Other(String),
}

impl ResourceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CREATE_COMPLETE" => ResourceStatus::CreateComplete,
            "UPDATE_COMPLETE" => ResourceStatus::UpdateComplete,
            other => ResourceStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceStatus::CreateComplete => "CREATE_COMPLETE",
            ResourceStatus::UpdateComplete => "UPDATE_COMPLETE",
            ResourceStatus::Other(raw) => raw,
        }
    }

    /// `CREATE_COMPLETE` or `UPDATE_COMPLETE`.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ResourceStatus::CreateComplete | ResourceStatus::UpdateComplete
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource of the deployed stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveResource {
    pub logical_id: String,
    pub status: ResourceStatus,
}

impl LiveResource {
    pub fn new(logical_id: impl Into<String>, status: ResourceStatus) -> Self {
        Self {
            logical_id: logical_id.into(),
            status,
        }
    }
}

/// The five CloudFormation calls the engine issues.
///
/// Implementations must report a missing stack as a [`ProviderError`] of kind
/// `NotFound`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// Raw template body (JSON or YAML).
    async fn get_template(&self, stack: &StackName) -> Result<String, ProviderError>;

    /// Status of every stack matching the name.
    async fn describe_stacks(&self, stack: &StackName)
    -> Result<Vec<ResourceStatus>, ProviderError>;

    async fn describe_stack_resources(
        &self,
        stack: &StackName,
    ) -> Result<Vec<LiveResource>, ProviderError>;

    async fn update_termination_protection(
        &self,
        stack: &StackName,
        enabled: bool,
    ) -> Result<(), ProviderError>;

    async fn delete_stack(&self, stack: &StackName) -> Result<(), ProviderError>;
}

/// Hands out an authenticated client for the account a cluster lives in.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(
        &self,
        cluster: &ClusterRecord,
    ) -> Result<Arc<dyn CloudFormationApi>, ProviderError>;
}

/// Factory that returns the same client for every cluster.
pub struct StaticClientFactory {
    client: Arc<dyn CloudFormationApi>,
}

impl StaticClientFactory {
    pub fn new(client: Arc<dyn CloudFormationApi>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn client_for(
        &self,
        _cluster: &ClusterRecord,
    ) -> Result<Arc<dyn CloudFormationApi>, ProviderError> {
        Ok(Arc::clone(&self.client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_round_trip() {
        assert_eq!(
            ResourceStatus::parse("CREATE_COMPLETE"),
            ResourceStatus::CreateComplete
        );
        assert_eq!(
            ResourceStatus::parse("UPDATE_COMPLETE"),
            ResourceStatus::UpdateComplete
        );

        let rollback = ResourceStatus::parse("UPDATE_ROLLBACK_COMPLETE");
        assert_eq!(
            rollback,
            ResourceStatus::Other("UPDATE_ROLLBACK_COMPLETE".to_string())
        );
        assert_eq!(rollback.as_str(), "UPDATE_ROLLBACK_COMPLETE");
    }

    #[test]
    fn test_only_two_states_are_settled() {
        assert!(ResourceStatus::CreateComplete.is_settled());
        assert!(ResourceStatus::UpdateComplete.is_settled());

        for raw in [
            "CREATE_IN_PROGRESS",
            "CREATE_FAILED",
            "UPDATE_IN_PROGRESS",
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            "ROLLBACK_COMPLETE",
            "DELETE_IN_PROGRESS",
            "DELETE_FAILED",
            "IMPORT_COMPLETE",
        ] {
            assert!(!ResourceStatus::parse(raw).is_settled(), "{raw}");
        }
    }
}
