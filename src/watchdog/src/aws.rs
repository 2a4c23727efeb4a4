//! CloudFormation adapter and per-cluster client acquisition.

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use common::config::AwsConfig;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cluster::ClusterRecord;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::key::StackName;
use crate::provider::{ClientFactory, CloudFormationApi, LiveResource, ResourceStatus};

const SESSION_NAME: &str = "tccpf-watchdog";

/// Most resources a single `DescribeStackResources` response carries. The
/// call has no pagination.
pub const DESCRIBE_STACK_RESOURCES_LIMIT: usize = 100;

/// Reject a listing that may have been cut off at the service limit.
///
/// A truncated listing would hide resources from both the completeness
/// comparison and the settled-status check.
fn complete_listing(
    operation: &'static str,
    stack: &StackName,
    resources: Vec<LiveResource>,
) -> Result<Vec<LiveResource>, ProviderError> {
    if resources.len() >= DESCRIBE_STACK_RESOURCES_LIMIT {
        return Err(ProviderError::new(
            operation,
            ProviderErrorKind::Other,
            format!(
                "stack {stack} returned {} resources, the listing may be truncated",
                resources.len()
            ),
        ));
    }
    Ok(resources)
}

/// Turn an SDK failure into a classified [`ProviderError`].
///
/// The message carries the whole error chain so the not-found text of the
/// service response is part of what gets classified.
fn provider_error<E, R>(operation: &'static str, error: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = error.code().map(str::to_string);
    let message = DisplayErrorContext(&error).to_string();
    ProviderError::classify(operation, code.as_deref(), message)
}

/// [`CloudFormationApi`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsCloudFormation {
    client: Client,
    call_timeout: Duration,
}

impl AwsCloudFormation {
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| ProviderError::timeout(operation, self.call_timeout))?
    }
}

#[async_trait]
impl CloudFormationApi for AwsCloudFormation {
    async fn get_template(&self, stack: &StackName) -> Result<String, ProviderError> {
        const OP: &str = "GetTemplate";
        self.bounded(OP, async {
            let output = self
                .client
                .get_template()
                .stack_name(stack.as_str())
                .send()
                .await
                .map_err(|e| provider_error(OP, e))?;

            output.template_body().map(str::to_string).ok_or_else(|| {
                ProviderError::new(OP, ProviderErrorKind::Other, "response carried no template body")
            })
        })
        .await
    }

    async fn describe_stacks(
        &self,
        stack: &StackName,
    ) -> Result<Vec<ResourceStatus>, ProviderError> {
        const OP: &str = "DescribeStacks";
        self.bounded(OP, async {
            let output = self
                .client
                .describe_stacks()
                .stack_name(stack.as_str())
                .send()
                .await
                .map_err(|e| provider_error(OP, e))?;

            Ok(output
                .stacks()
                .iter()
                .map(|s| ResourceStatus::parse(s.stack_status().as_str()))
                .collect())
        })
        .await
    }

    async fn describe_stack_resources(
        &self,
        stack: &StackName,
    ) -> Result<Vec<LiveResource>, ProviderError> {
        const OP: &str = "DescribeStackResources";
        self.bounded(OP, async {
            let output = self
                .client
                .describe_stack_resources()
                .stack_name(stack.as_str())
                .send()
                .await
                .map_err(|e| provider_error(OP, e))?;

            let resources = output
                .stack_resources()
                .iter()
                .map(|r| {
                    LiveResource::new(
                        r.logical_resource_id(),
                        ResourceStatus::parse(r.resource_status().as_str()),
                    )
                })
                .collect();
            complete_listing(OP, stack, resources)
        })
        .await
    }

    async fn update_termination_protection(
        &self,
        stack: &StackName,
        enabled: bool,
    ) -> Result<(), ProviderError> {
        const OP: &str = "UpdateTerminationProtection";
        self.bounded(OP, async {
            self.client
                .update_termination_protection()
                .stack_name(stack.as_str())
                .enable_termination_protection(enabled)
                .send()
                .await
                .map_err(|e| provider_error(OP, e))?;
            Ok(())
        })
        .await
    }

    async fn delete_stack(&self, stack: &StackName) -> Result<(), ProviderError> {
        const OP: &str = "DeleteStack";
        self.bounded(OP, async {
            self.client
                .delete_stack()
                .stack_name(stack.as_str())
                .send()
                .await
                .map_err(|e| provider_error(OP, e))?;
            Ok(())
        })
        .await
    }
}

type ClientKey = (Option<String>, Option<String>);

/// Builds one client per `(region, role)` pair and reuses it.
///
/// A cluster's own region and role take precedence over the `[aws]` defaults.
pub struct AwsClientFactory {
    base: SdkConfig,
    default_region: Option<String>,
    default_role: Option<String>,
    call_timeout: Duration,
    clients: Mutex<HashMap<ClientKey, Arc<AwsCloudFormation>>>,
}

impl AwsClientFactory {
    /// Load the shared SDK configuration from the default provider chain.
    pub async fn from_config(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let base = loader.load().await;

        Self {
            base,
            default_region: config.region.clone(),
            default_role: config.role_arn.clone(),
            call_timeout: config.call_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn key_for(&self, cluster: &ClusterRecord) -> ClientKey {
        (
            cluster.region.clone().or_else(|| self.default_region.clone()),
            cluster.role_arn.clone().or_else(|| self.default_role.clone()),
        )
    }

    async fn build(&self, region: Option<&str>, role: Option<&str>) -> AwsCloudFormation {
        let mut builder = aws_sdk_cloudformation::config::Builder::from(&self.base);
        if let Some(region) = region {
            builder = builder.region(Region::new(region.to_string()));
        }

        if let Some(role) = role {
            let mut provider = AssumeRoleProvider::builder(role)
                .session_name(SESSION_NAME)
                .configure(&self.base);
            if let Some(region) = region {
                provider = provider.region(Region::new(region.to_string()));
            }
            builder = builder.credentials_provider(provider.build().await);
        }

        AwsCloudFormation::new(Client::from_conf(builder.build()), self.call_timeout)
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn client_for(
        &self,
        cluster: &ClusterRecord,
    ) -> Result<Arc<dyn CloudFormationApi>, ProviderError> {
        let key = self.key_for(cluster);

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client) as Arc<dyn CloudFormationApi>);
        }

        tracing::debug!(
            cluster = %cluster.name,
            region = key.0.as_deref().unwrap_or("<default>"),
            role = key.1.as_deref().unwrap_or("<none>"),
            "Building CloudFormation client"
        );

        let client = Arc::new(self.build(key.0.as_deref(), key.1.as_deref()).await);
        clients.insert(key, Arc::clone(&client));

        Ok(client)
    }
}
