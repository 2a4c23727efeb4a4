//! In-memory provisioning service for tests.
//!
//! [`FakeCloudFormation`] keeps stacks in memory, records every call it
//! receives and behaves like the real service where the engine depends on
//! it: missing stacks are reported with the "does not exist" message and a
//! protected stack refuses deletion.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::key::StackName;
use crate::provider::{CloudFormationApi, LiveResource, ResourceStatus};

/// A call received by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetTemplate(StackName),
    DescribeStacks(StackName),
    DescribeStackResources(StackName),
    UpdateTerminationProtection(StackName, bool),
    DeleteStack(StackName),
}

impl Call {
    pub fn operation(&self) -> &'static str {
        match self {
            Call::GetTemplate(_) => "GetTemplate",
            Call::DescribeStacks(_) => "DescribeStacks",
            Call::DescribeStackResources(_) => "DescribeStackResources",
            Call::UpdateTerminationProtection(..) => "UpdateTerminationProtection",
            Call::DeleteStack(_) => "DeleteStack",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::UpdateTerminationProtection(..) | Call::DeleteStack(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FakeStack {
    template: String,
    status: ResourceStatus,
    resources: Vec<LiveResource>,
    termination_protection: bool,
}

impl FakeStack {
    /// A settled stack with termination protection on and no live resources.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            status: ResourceStatus::CreateComplete,
            resources: Vec::new(),
            termination_protection: true,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_resource(mut self, logical_id: &str, status: ResourceStatus) -> Self {
        self.resources.push(LiveResource::new(logical_id, status));
        self
    }

    pub fn with_termination_protection(mut self, enabled: bool) -> Self {
        self.termination_protection = enabled;
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    stacks: HashMap<StackName, FakeStack>,
    calls: Vec<Call>,
    failures: HashMap<&'static str, ProviderError>,
}

#[derive(Debug, Default)]
pub struct FakeCloudFormation {
    state: Mutex<FakeState>,
    delay: Option<Duration>,
}

impl FakeCloudFormation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(self, name: &str, stack: FakeStack) -> Self {
        self.insert_stack(name, stack);
        self
    }

    /// Make every call wait `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert_stack(&self, name: &str, stack: FakeStack) {
        self.state().stacks.insert(StackName::new(name), stack);
    }

    pub fn has_stack(&self, name: &str) -> bool {
        self.state().stacks.contains_key(&StackName::new(name))
    }

    pub fn termination_protection(&self, name: &str) -> Option<bool> {
        self.state()
            .stacks
            .get(&StackName::new(name))
            .map(|stack| stack.termination_protection)
    }

    /// Fail every call of `operation` until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, operation: &'static str, kind: ProviderErrorKind, message: &str) {
        self.state()
            .failures
            .insert(operation, ProviderError::new(operation, kind, message));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, then apply any injected failure and the stack lookup.
    async fn begin<T>(
        &self,
        call: Call,
        respond: impl FnOnce(&mut FakeStack) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let operation = call.operation();
        let stack = match &call {
            Call::GetTemplate(stack)
            | Call::DescribeStacks(stack)
            | Call::DescribeStackResources(stack)
            | Call::UpdateTerminationProtection(stack, _)
            | Call::DeleteStack(stack) => stack.clone(),
        };
        state.calls.push(call);

        if let Some(error) = state.failures.get(operation) {
            return Err(error.clone());
        }
        match state.stacks.get_mut(&stack) {
            Some(entry) => respond(entry),
            None => Err(ProviderError::classify(
                operation,
                Some("ValidationError"),
                format!("Stack with id {stack} does not exist"),
            )),
        }
    }
}

#[async_trait]
impl CloudFormationApi for FakeCloudFormation {
    async fn get_template(&self, stack: &StackName) -> Result<String, ProviderError> {
        self.begin(Call::GetTemplate(stack.clone()), |entry| {
            Ok(entry.template.clone())
        })
        .await
    }

    async fn describe_stacks(
        &self,
        stack: &StackName,
    ) -> Result<Vec<ResourceStatus>, ProviderError> {
        self.begin(Call::DescribeStacks(stack.clone()), |entry| {
            Ok(vec![entry.status.clone()])
        })
        .await
    }

    async fn describe_stack_resources(
        &self,
        stack: &StackName,
    ) -> Result<Vec<LiveResource>, ProviderError> {
        self.begin(Call::DescribeStackResources(stack.clone()), |entry| {
            Ok(entry.resources.clone())
        })
        .await
    }

    async fn update_termination_protection(
        &self,
        stack: &StackName,
        enabled: bool,
    ) -> Result<(), ProviderError> {
        self.begin(
            Call::UpdateTerminationProtection(stack.clone(), enabled),
            |entry| {
                entry.termination_protection = enabled;
                Ok(())
            },
        )
        .await
    }

    async fn delete_stack(&self, stack: &StackName) -> Result<(), ProviderError> {
        self.begin(Call::DeleteStack(stack.clone()), |entry| {
            if entry.termination_protection {
                return Err(ProviderError::classify(
                    "DeleteStack",
                    Some("ValidationError"),
                    format!(
                        "Stack [{stack}] cannot be deleted while TerminationProtection is enabled"
                    ),
                ));
            }
            Ok(())
        })
        .await?;

        self.state().stacks.remove(stack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_stack_reports_not_found() {
        let fake = FakeCloudFormation::new();
        let error = fake
            .get_template(&StackName::new("cluster-foo-tccpf"))
            .await
            .unwrap_err();

        assert!(error.is_not_found());
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_protected_stack_refuses_deletion() {
        let fake = FakeCloudFormation::new().with_stack("cluster-foo-tccpf", FakeStack::new("{}"));
        let stack = StackName::new("cluster-foo-tccpf");

        let error = fake.delete_stack(&stack).await.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Other);
        assert!(fake.has_stack("cluster-foo-tccpf"));

        fake.update_termination_protection(&stack, false)
            .await
            .unwrap();
        fake.delete_stack(&stack).await.unwrap();
        assert!(!fake.has_stack("cluster-foo-tccpf"));
        assert_eq!(fake.mutating_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let fake = FakeCloudFormation::new().with_stack("cluster-foo-tccpf", FakeStack::new("{}"));
        fake.fail_on("DescribeStacks", ProviderErrorKind::Throttled, "Rate exceeded");

        let stack = StackName::new("cluster-foo-tccpf");
        let error = fake.describe_stacks(&stack).await.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Throttled);

        fake.clear_failures();
        assert_eq!(
            fake.describe_stacks(&stack).await.unwrap(),
            vec![ResourceStatus::CreateComplete]
        );
    }
}
