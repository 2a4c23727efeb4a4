//! Declared resources of a stack template.
//!
//! Templates arrive as JSON or YAML. Resource declarations and their `Type`
//! are resolved through [`intrinsics`] before anything is extracted, so an
//! expression node is never mistaken for a literal resource.

mod intrinsics;

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use intrinsics::{Resolver, is_intrinsic_key, is_intrinsic_node};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("template body is neither JSON nor YAML: {0}")]
    Syntax(String),

    #[error("template root is not a mapping")]
    NotAMapping,

    #[error("template has no Resources section")]
    MissingResources,

    #[error("resource {logical_id}: {message}")]
    InvalidResource { logical_id: String, message: String },

    #[error("unsupported intrinsic function {name}")]
    UnsupportedIntrinsic { name: String },

    #[error("{function}: {message}")]
    Intrinsic { function: String, message: String },

    #[error("condition {0} is not declared")]
    UnknownCondition(String),
}

/// A declared unit of the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResource {
    pub logical_id: String,
    pub resource_type: String,
}

impl TemplateResource {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    resources: Vec<TemplateResource>,
}

impl Template {
    pub fn new(resources: Vec<TemplateResource>) -> Self {
        Self { resources }
    }

    /// Parse a template body and extract its resolved resource declarations.
    ///
    /// YAML is a superset of JSON, so one parser handles both.
    pub fn parse(body: &str) -> Result<Self, TemplateError> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(body).map_err(|e| TemplateError::Syntax(e.to_string()))?;
        let document = intrinsics::to_long_form(document)?;

        let Value::Object(root) = &document else {
            return Err(TemplateError::NotAMapping);
        };
        let declarations = root
            .get("Resources")
            .and_then(Value::as_object)
            .ok_or(TemplateError::MissingResources)?;

        let resolver = Resolver::new(root);
        let mut resources = Vec::with_capacity(declarations.len());

        for (logical_id, declaration) in declarations {
            // e.g. Fn::ForEach::Subnets, which expands into several resources
            if is_intrinsic_key(logical_id) {
                return Err(TemplateError::UnsupportedIntrinsic {
                    name: logical_id.clone(),
                });
            }

            let declaration = if is_intrinsic_node(declaration) {
                match resolver.resolve(declaration)? {
                    Some(resolved) => resolved,
                    None => continue,
                }
            } else {
                declaration.clone()
            };

            // resources whose condition is false are never created
            match declaration.get("Condition") {
                None => {}
                Some(Value::String(name)) => {
                    if !resolver.condition_holds(name)? {
                        continue;
                    }
                }
                Some(other) => {
                    return Err(invalid_resource(
                        logical_id,
                        format!("Condition must name a condition, got {other}"),
                    ));
                }
            }

            let type_node = declaration
                .get("Type")
                .ok_or_else(|| invalid_resource(logical_id, "declaration has no Type"))?;

            let resource_type = match resolver.resolve(type_node)? {
                Some(Value::String(ty)) if !ty.is_empty() => ty,
                Some(other) => {
                    return Err(invalid_resource(
                        logical_id,
                        format!("Type resolved to {other}, not a resource type name"),
                    ));
                }
                None => return Err(invalid_resource(logical_id, "Type resolved to no value")),
            };

            resources.push(TemplateResource {
                logical_id: logical_id.clone(),
                resource_type,
            });
        }

        Ok(Self { resources })
    }

    pub fn resources(&self) -> &[TemplateResource] {
        &self.resources
    }

    /// Number of declared resources per resource type.
    pub fn count_by_type(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            *counts.entry(resource.resource_type.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.count_by_type().get(resource_type).copied().unwrap_or(0)
    }

    pub fn logical_ids(&self) -> BTreeSet<&str> {
        self.resources
            .iter()
            .map(|resource| resource.logical_id.as_str())
            .collect()
    }
}

fn invalid_resource(logical_id: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::InvalidResource {
        logical_id: logical_id.to_string(),
        message: message.into(),
    }
}
