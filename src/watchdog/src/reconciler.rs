//! One reconcile cycle: gate, read, classify, delete.
//!
//! Every cycle is independent. Running it twice against the same upstream
//! state gives the same outcome, so the caller is free to re-invoke it on any
//! cadence.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::classifier::{ClassifyError, StalenessClassifier, Verdict, classifier_for};
use crate::cluster::{ClusterKey, ClusterRecord};
use crate::config::EngineConfig;
use crate::deleter::{DeleteError, DeleteOutcome, GuardedDeleter, PreconditionViolation};
use crate::error::ProviderError;
use crate::gate::{ClusterGate, GateDecision};
use crate::inventory::{InventoryError, StackInventoryReader};
use crate::key::StackName;
use crate::metrics::ReconcileMetrics;
use crate::provider::ClientFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The gate stopped the cycle before any upstream call.
    Skipped(GateDecision),
    /// The stack does not exist upstream.
    Absent,
    Kept,
    Deleted,
    /// The stack was stale and passed every check, but dry-run is on.
    DryRun,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no client for cluster {cluster}: {source}")]
    Client {
        cluster: ClusterKey,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Inventory(InventoryError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("refusing to delete: {0}")]
    Precondition(PreconditionViolation),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("reconcile of cluster {cluster} did not finish within {timeout:?}")]
    DeadlineExceeded { cluster: ClusterKey, timeout: Duration },
}

impl ReconcileError {
    /// Everything but a precondition violation is worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ReconcileError::Precondition(_))
    }
}

/// What the caller should do next with a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing left to do until the next regular observation.
    Done,
    RequeueAfter(Duration),
    RequeueWithBackoff,
}

pub struct Reconciler {
    config: EngineConfig,
    gate: ClusterGate,
    classifier: Box<dyn StalenessClassifier>,
    clients: Arc<dyn ClientFactory>,
    metrics: ReconcileMetrics,
}

impl Reconciler {
    pub fn new(config: EngineConfig, clients: Arc<dyn ClientFactory>) -> Self {
        let classifier = classifier_for(config.classifier, &config.route_resource_type);
        let gate = ClusterGate::new(config.eligibility.clone());

        tracing::info!(
            classifier = classifier.name(),
            eligibility = config.eligibility.is_some(),
            dry_run = config.dry_run,
            "Reconciler configured"
        );

        Self {
            config,
            gate,
            classifier,
            clients,
            metrics: ReconcileMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one cycle for `cluster`, bounded by the configured deadline.
    pub async fn reconcile(
        &self,
        cluster: &ClusterRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let timeout = self.config.cycle_timeout;
        let result = match tokio::time::timeout(timeout, self.run_cycle(cluster)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::DeadlineExceeded {
                cluster: cluster.key(),
                timeout,
            }),
        };

        if let Err(ReconcileError::Precondition(violation)) = &result {
            tracing::error!(
                cluster = %cluster.name,
                namespace = %cluster.namespace,
                reason = %violation,
                "Refusing to delete stack, not retrying"
            );
        }
        self.metrics.record(&result);

        result
    }

    /// Map a cycle result to the next scheduling step.
    pub fn action_for(&self, result: &Result<ReconcileOutcome, ReconcileError>) -> ReconcileAction {
        match result {
            Ok(ReconcileOutcome::Deleted) => {
                ReconcileAction::RequeueAfter(self.config.deletion_recheck_interval)
            }
            Ok(_) => ReconcileAction::Done,
            Err(e) if e.is_transient() => ReconcileAction::RequeueWithBackoff,
            Err(_) => ReconcileAction::Done,
        }
    }

    async fn run_cycle(&self, cluster: &ClusterRecord) -> Result<ReconcileOutcome, ReconcileError> {
        let decision = self.gate.evaluate(cluster);
        if !decision.is_proceed() {
            tracing::info!(
                cluster = %cluster.name,
                namespace = %cluster.namespace,
                reason = decision.reason(),
                "Skipping cluster"
            );
            return Ok(ReconcileOutcome::Skipped(decision));
        }

        let stack = StackName::for_cluster(cluster);
        let api = self
            .clients
            .client_for(cluster)
            .await
            .map_err(|source| ReconcileError::Client {
                cluster: cluster.key(),
                source,
            })?;

        let snapshot = match StackInventoryReader::new(api.as_ref())
            .fetch(&stack, self.classifier.needs())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(InventoryError::NotFound(_)) => {
                tracing::info!(
                    cluster = %cluster.name,
                    stack = %stack,
                    verdict = %Verdict::AbsentUpstream,
                    "Stack does not exist"
                );
                return Ok(ReconcileOutcome::Absent);
            }
            Err(e) => return Err(ReconcileError::Inventory(e)),
        };

        let verdict = self.classifier.classify(&snapshot)?;
        tracing::info!(
            cluster = %cluster.name,
            stack = %stack,
            classifier = self.classifier.name(),
            verdict = %verdict,
            "Classified stack"
        );

        match verdict {
            Verdict::Keep => Ok(ReconcileOutcome::Kept),
            Verdict::AbsentUpstream => Ok(ReconcileOutcome::Absent),
            Verdict::Stale => {
                let deleter = GuardedDeleter::new(api, self.config.dry_run);
                match deleter.delete(&stack).await {
                    Ok(DeleteOutcome::Deleted) => Ok(ReconcileOutcome::Deleted),
                    Ok(DeleteOutcome::DryRun) => Ok(ReconcileOutcome::DryRun),
                    Err(DeleteError::Provider(e)) if e.is_not_found() => {
                        tracing::info!(
                            cluster = %cluster.name,
                            stack = %stack,
                            "Stack disappeared before it could be deleted"
                        );
                        Ok(ReconcileOutcome::Absent)
                    }
                    Err(DeleteError::Provider(e)) => Err(ReconcileError::Provider(e)),
                    Err(DeleteError::Precondition(violation)) => {
                        Err(ReconcileError::Precondition(violation))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::provider::{
        CloudFormationApi, LiveResource, MockCloudFormationApi, ResourceStatus,
        StaticClientFactory,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use common::config::ClassifierPolicy;

    const ROUTES: &str = r#"{"Resources": {"R": {"Type": "AWS::EC2::Route"}}}"#;
    const NO_ROUTES: &str = r#"{"Resources": {"T": {"Type": "AWS::EC2::RouteTable"}}}"#;

    fn reconciler(api: MockCloudFormationApi) -> Reconciler {
        Reconciler::new(
            EngineConfig::new(ClassifierPolicy::RouteCount),
            Arc::new(StaticClientFactory::new(Arc::new(api))),
        )
    }

    fn not_found(operation: &'static str) -> ProviderError {
        ProviderError::classify(
            operation,
            Some("ValidationError"),
            "Stack with id cluster-foo-tccpf does not exist",
        )
    }

    fn cluster() -> ClusterRecord {
        ClusterRecord::new("foo", "default")
    }

    #[tokio::test]
    async fn test_skip_issues_no_calls() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template().never();

        let reconciler = reconciler(api);
        let result = reconciler
            .reconcile(&cluster().with_deletion_timestamp(Utc::now()))
            .await;

        assert!(matches!(
            result,
            Ok(ReconcileOutcome::Skipped(GateDecision::SkipDeleted))
        ));
        assert_eq!(reconciler.action_for(&result), ReconcileAction::Done);
    }

    #[tokio::test]
    async fn test_keep() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .returning(|_| Ok(ROUTES.to_string()));
        api.expect_describe_stacks().never();
        api.expect_delete_stack().never();

        let reconciler = reconciler(api);
        let result = reconciler.reconcile(&cluster()).await;

        assert!(matches!(result, Ok(ReconcileOutcome::Kept)));
        assert_eq!(reconciler.action_for(&result), ReconcileAction::Done);
    }

    #[tokio::test]
    async fn test_absent_upstream_short_circuits() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .times(2)
            .returning(|_| Err(not_found("GetTemplate")));
        api.expect_describe_stacks().never();
        api.expect_update_termination_protection().never();
        api.expect_delete_stack().never();

        let reconciler = reconciler(api);
        for _ in 0..2 {
            let result = reconciler.reconcile(&cluster()).await;
            assert!(matches!(result, Ok(ReconcileOutcome::Absent)));
            assert_eq!(reconciler.action_for(&result), ReconcileAction::Done);
        }
    }

    #[tokio::test]
    async fn test_stale_stack_is_deleted() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .returning(|_| Ok(NO_ROUTES.to_string()));
        api.expect_describe_stacks()
            .returning(|_| Ok(vec![ResourceStatus::CreateComplete]));
        api.expect_describe_stack_resources()
            .returning(|_| Ok(vec![LiveResource::new("T", ResourceStatus::CreateComplete)]));
        api.expect_update_termination_protection()
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_delete_stack().times(1).returning(|_| Ok(()));

        let reconciler = reconciler(api);
        let result = reconciler.reconcile(&cluster()).await;

        assert!(matches!(result, Ok(ReconcileOutcome::Deleted)));
        assert_eq!(
            reconciler.action_for(&result),
            ReconcileAction::RequeueAfter(Duration::from_secs(60))
        );
        assert_eq!(reconciler.metrics().deleted(), 1);
    }

    #[tokio::test]
    async fn test_stack_vanishing_during_delete_counts_as_absent() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .returning(|_| Ok(NO_ROUTES.to_string()));
        api.expect_describe_stacks()
            .returning(|_| Err(not_found("DescribeStacks")));
        api.expect_update_termination_protection().never();
        api.expect_delete_stack().never();

        let result = reconciler(api).reconcile(&cluster()).await;
        assert!(matches!(result, Ok(ReconcileOutcome::Absent)));
    }

    #[tokio::test]
    async fn test_precondition_is_terminal() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .returning(|_| Ok(NO_ROUTES.to_string()));
        api.expect_describe_stacks().returning(|_| {
            Ok(vec![ResourceStatus::Other("DELETE_IN_PROGRESS".to_string())])
        });
        api.expect_update_termination_protection().never();
        api.expect_delete_stack().never();

        let reconciler = reconciler(api);
        let result = reconciler.reconcile(&cluster()).await;

        let error = result.as_ref().unwrap_err();
        assert!(!error.is_transient());
        assert_eq!(reconciler.action_for(&result), ReconcileAction::Done);
        assert_eq!(reconciler.metrics().precondition_failures(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_is_transient() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template().returning(|_| {
            Err(ProviderError::new(
                "GetTemplate",
                ProviderErrorKind::Throttled,
                "Rate exceeded",
            ))
        });

        let reconciler = reconciler(api);
        let result = reconciler.reconcile(&cluster()).await;

        assert!(result.as_ref().unwrap_err().is_transient());
        assert_eq!(
            reconciler.action_for(&result),
            ReconcileAction::RequeueWithBackoff
        );
    }

    #[tokio::test]
    async fn test_malformed_template_is_transient() {
        let mut api = MockCloudFormationApi::new();
        api.expect_get_template()
            .returning(|_| Ok("Resources: [".to_string()));

        let reconciler = reconciler(api);
        let result = reconciler.reconcile(&cluster()).await;

        assert!(matches!(result, Err(ReconcileError::Inventory(_))));
        assert_eq!(
            reconciler.action_for(&result),
            ReconcileAction::RequeueWithBackoff
        );
    }

    struct FailingFactory;

    #[async_trait]
    impl ClientFactory for FailingFactory {
        async fn client_for(
            &self,
            _cluster: &ClusterRecord,
        ) -> Result<Arc<dyn CloudFormationApi>, ProviderError> {
            Err(ProviderError::new(
                "AssumeRole",
                ProviderErrorKind::AccessDenied,
                "not authorized to assume role",
            ))
        }
    }

    #[tokio::test]
    async fn test_client_failure_is_transient() {
        let reconciler = Reconciler::new(
            EngineConfig::new(ClassifierPolicy::RouteCount),
            Arc::new(FailingFactory),
        );

        let result = reconciler.reconcile(&cluster()).await;
        assert!(matches!(result, Err(ReconcileError::Client { .. })));
        assert_eq!(
            reconciler.action_for(&result),
            ReconcileAction::RequeueWithBackoff
        );
    }

    #[tokio::test]
    async fn test_gate_runs_before_client_acquisition() {
        let reconciler = Reconciler::new(
            EngineConfig::new(ClassifierPolicy::RouteCount),
            Arc::new(FailingFactory),
        );

        let mut paused = cluster();
        paused.paused = true;
        let result = reconciler.reconcile(&paused).await;

        assert!(matches!(
            result,
            Ok(ReconcileOutcome::Skipped(GateDecision::SkipPaused))
        ));
    }
}
