//! Stack inventory reads.

use thiserror::Error;
use tracing::debug;

use crate::error::ProviderError;
use crate::key::StackName;
use crate::provider::{CloudFormationApi, LiveResource};
use crate::template::{Template, TemplateError};

/// Which upstream reads a classifier depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryNeeds {
    pub template: bool,
    pub live_resources: bool,
}

impl InventoryNeeds {
    pub const TEMPLATE_ONLY: Self = Self {
        template: true,
        live_resources: false,
    };

    pub const TEMPLATE_AND_LIVE: Self = Self {
        template: true,
        live_resources: true,
    };
}

/// What was read about a stack in one cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackSnapshot {
    pub template: Option<Template>,
    pub live_resources: Option<Vec<LiveResource>>,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("stack {0} does not exist")]
    NotFound(StackName),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("template of stack {stack} could not be read: {source}")]
    Template {
        stack: StackName,
        #[source]
        source: TemplateError,
    },
}

impl InventoryError {
    fn from_provider(stack: &StackName, error: ProviderError) -> Self {
        if error.is_not_found() {
            InventoryError::NotFound(stack.clone())
        } else {
            InventoryError::Provider(error)
        }
    }
}

/// Thin reader over the provisioning service; issues only the calls asked for.
pub struct StackInventoryReader<'a> {
    api: &'a dyn CloudFormationApi,
}

impl<'a> StackInventoryReader<'a> {
    pub fn new(api: &'a dyn CloudFormationApi) -> Self {
        Self { api }
    }

    pub async fn fetch(
        &self,
        stack: &StackName,
        needs: InventoryNeeds,
    ) -> Result<StackSnapshot, InventoryError> {
        let mut snapshot = StackSnapshot::default();

        if needs.template {
            let body = self
                .api
                .get_template(stack)
                .await
                .map_err(|e| InventoryError::from_provider(stack, e))?;
            let template = Template::parse(&body).map_err(|source| InventoryError::Template {
                stack: stack.clone(),
                source,
            })?;
            debug!(
                stack = %stack,
                resources = template.resources().len(),
                "Parsed stack template"
            );
            snapshot.template = Some(template);
        }

        if needs.live_resources {
            let resources = self
                .api
                .describe_stack_resources(stack)
                .await
                .map_err(|e| InventoryError::from_provider(stack, e))?;
            debug!(
                stack = %stack,
                resources = resources.len(),
                "Listed live stack resources"
            );
            snapshot.live_resources = Some(resources);
        }

        Ok(snapshot)
    }
}
