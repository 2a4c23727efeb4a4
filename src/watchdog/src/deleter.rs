//! Guarded stack deletion.
//!
//! The sequence is: suffix check, status check, disable termination
//! protection, delete. A failing step aborts the rest. If the delete call
//! fails after protection was disabled, protection stays off and the next
//! cycle runs the whole sequence again; disabling it a second time is a
//! no-op upstream.

use std::sync::Arc;
use thiserror::Error;

use crate::error::ProviderError;
use crate::key::{STACK_NAME_SUFFIX, StackName};
use crate::provider::{CloudFormationApi, ResourceStatus};

/// A safety check that did not hold. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("stack name {stack} does not end in {suffix}", suffix = STACK_NAME_SUFFIX)]
    InvalidSuffix { stack: StackName },

    #[error("stack {stack} reported no status")]
    NoStackStatus { stack: StackName },

    #[error("stack {stack} is in state {status}")]
    StackNotSettled {
        stack: StackName,
        status: ResourceStatus,
    },

    #[error("resource {logical_id} of stack {stack} is in state {status}")]
    ResourceNotSettled {
        stack: StackName,
        logical_id: String,
        status: ResourceStatus,
    },
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("refusing to delete: {0}")]
    Precondition(#[from] PreconditionViolation),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Every check passed; the mutating calls were skipped.
    DryRun,
}

pub struct GuardedDeleter {
    api: Arc<dyn CloudFormationApi>,
    dry_run: bool,
}

impl GuardedDeleter {
    pub fn new(api: Arc<dyn CloudFormationApi>, dry_run: bool) -> Self {
        Self { api, dry_run }
    }

    pub async fn delete(&self, stack: &StackName) -> Result<DeleteOutcome, DeleteError> {
        if !stack.has_watchdog_suffix() {
            return Err(PreconditionViolation::InvalidSuffix {
                stack: stack.clone(),
            }
            .into());
        }

        self.check_settled(stack).await?;

        if self.dry_run {
            tracing::info!(stack = %stack, "[DRY-RUN] Would delete stack");
            return Ok(DeleteOutcome::DryRun);
        }

        tracing::warn!(stack = %stack, "Deleting stack");

        self.api.update_termination_protection(stack, false).await?;
        tracing::debug!(stack = %stack, "Termination protection disabled");

        self.api.delete_stack(stack).await?;
        tracing::info!(stack = %stack, "Stack deletion requested");

        Ok(DeleteOutcome::Deleted)
    }

    /// Every stack status and every resource status must be settled.
    async fn check_settled(&self, stack: &StackName) -> Result<(), DeleteError> {
        let statuses = self.api.describe_stacks(stack).await?;
        if statuses.is_empty() {
            return Err(PreconditionViolation::NoStackStatus {
                stack: stack.clone(),
            }
            .into());
        }
        if let Some(status) = statuses.into_iter().find(|s| !s.is_settled()) {
            return Err(PreconditionViolation::StackNotSettled {
                stack: stack.clone(),
                status,
            }
            .into());
        }

        let resources = self.api.describe_stack_resources(stack).await?;
        if let Some(resource) = resources.into_iter().find(|r| !r.status.is_settled()) {
            return Err(PreconditionViolation::ResourceNotSettled {
                stack: stack.clone(),
                logical_id: resource.logical_id,
                status: resource.status,
            }
            .into());
        }

        Ok(())
    }
}
