//! Staleness strategies.
//!
//! A deployment runs exactly one strategy, picked from configuration when the
//! reconciler is built.

use common::config::ClassifierPolicy;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::inventory::{InventoryNeeds, StackSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The stack still serves its purpose.
    Keep,
    /// The stack is no longer needed and may be deleted.
    Stale,
    /// The stack does not exist upstream.
    AbsentUpstream,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Keep => "keep",
            Verdict::Stale => "stale",
            Verdict::AbsentUpstream => "absent_upstream",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("{classifier} classifier needs the {input}, which was not read")]
    MissingInput {
        classifier: &'static str,
        input: &'static str,
    },
}

pub trait StalenessClassifier: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Upstream reads required by [`classify`](Self::classify).
    fn needs(&self) -> InventoryNeeds;

    fn classify(&self, snapshot: &StackSnapshot) -> Result<Verdict, ClassifyError>;
}

/// Stale once the template declares no resource of the route type.
#[derive(Debug, Clone)]
pub struct RouteCount {
    route_type: String,
}

impl RouteCount {
    pub fn new(route_type: impl Into<String>) -> Self {
        Self {
            route_type: route_type.into(),
        }
    }
}

impl StalenessClassifier for RouteCount {
    fn name(&self) -> &'static str {
        "route_count"
    }

    fn needs(&self) -> InventoryNeeds {
        InventoryNeeds::TEMPLATE_ONLY
    }

    fn classify(&self, snapshot: &StackSnapshot) -> Result<Verdict, ClassifyError> {
        let template = snapshot
            .template
            .as_ref()
            .ok_or(ClassifyError::MissingInput {
                classifier: self.name(),
                input: "template",
            })?;

        let routes = template.count_of_type(&self.route_type);
        debug!(route_type = %self.route_type, routes, "Counted route resources");

        Ok(if routes == 0 {
            Verdict::Stale
        } else {
            Verdict::Keep
        })
    }
}

/// Keep only while the completed live resources are exactly the declared ones.
#[derive(Debug, Clone, Default)]
pub struct ResourceCompleteness;

impl StalenessClassifier for ResourceCompleteness {
    fn name(&self) -> &'static str {
        "resource_completeness"
    }

    fn needs(&self) -> InventoryNeeds {
        InventoryNeeds::TEMPLATE_AND_LIVE
    }

    fn classify(&self, snapshot: &StackSnapshot) -> Result<Verdict, ClassifyError> {
        let template = snapshot
            .template
            .as_ref()
            .ok_or(ClassifyError::MissingInput {
                classifier: self.name(),
                input: "template",
            })?;
        let live = snapshot
            .live_resources
            .as_ref()
            .ok_or(ClassifyError::MissingInput {
                classifier: self.name(),
                input: "live resources",
            })?;

        let declared = template.logical_ids();
        let completed: BTreeSet<&str> = live
            .iter()
            .filter(|resource| resource.status.is_settled())
            .map(|resource| resource.logical_id.as_str())
            .collect();

        if declared == completed {
            return Ok(Verdict::Keep);
        }

        debug!(
            missing = ?declared.difference(&completed).collect::<Vec<_>>(),
            unexpected = ?completed.difference(&declared).collect::<Vec<_>>(),
            "Declared and completed resources differ"
        );
        Ok(Verdict::Stale)
    }
}

pub fn classifier_for(
    policy: ClassifierPolicy,
    route_type: &str,
) -> Box<dyn StalenessClassifier> {
    match policy {
        ClassifierPolicy::RouteCount => Box::new(RouteCount::new(route_type)),
        ClassifierPolicy::ResourceCompleteness => Box::new(ResourceCompleteness),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LiveResource, ResourceStatus};
    use crate::template::{Template, TemplateResource};

    const ROUTE: &str = "AWS::EC2::Route";

    fn template(resources: &[(&str, &str)]) -> Template {
        Template::new(
            resources
                .iter()
                .map(|(id, ty)| TemplateResource::new(*id, *ty))
                .collect(),
        )
    }

    fn snapshot(declared: &[(&str, &str)], live: &[(&str, ResourceStatus)]) -> StackSnapshot {
        StackSnapshot {
            template: Some(template(declared)),
            live_resources: Some(
                live.iter()
                    .map(|(id, status)| LiveResource::new(*id, status.clone()))
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_route_count() {
        let classifier = RouteCount::new(ROUTE);

        let with_route = StackSnapshot {
            template: Some(template(&[("A", "X"), ("B", "X"), ("R", ROUTE)])),
            live_resources: None,
        };
        assert_eq!(classifier.classify(&with_route).unwrap(), Verdict::Keep);

        let without_route = StackSnapshot {
            template: Some(template(&[("A", "X"), ("B", "X")])),
            live_resources: None,
        };
        assert_eq!(classifier.classify(&without_route).unwrap(), Verdict::Stale);

        let empty = StackSnapshot {
            template: Some(Template::default()),
            live_resources: None,
        };
        assert_eq!(classifier.classify(&empty).unwrap(), Verdict::Stale);
    }

    #[test]
    fn test_route_count_type_is_exact() {
        let classifier = RouteCount::new(ROUTE);
        let snapshot = StackSnapshot {
            template: Some(template(&[("T", "AWS::EC2::RouteTable")])),
            live_resources: None,
        };
        assert_eq!(classifier.classify(&snapshot).unwrap(), Verdict::Stale);
    }

    #[test]
    fn test_resource_completeness_equal_sets() {
        use ResourceStatus::*;

        let declared = [("x", "T"), ("y", "T"), ("z", "T")];
        let live = [
            ("z", UpdateComplete),
            ("x", CreateComplete),
            ("y", CreateComplete),
        ];
        assert_eq!(
            ResourceCompleteness
                .classify(&snapshot(&declared, &live))
                .unwrap(),
            Verdict::Keep
        );
    }

    #[test]
    fn test_resource_completeness_divergence() {
        use ResourceStatus::*;

        let declared = [("x", "T"), ("y", "T"), ("z", "T")];

        let missing = [("x", CreateComplete), ("y", CreateComplete)];
        assert_eq!(
            ResourceCompleteness
                .classify(&snapshot(&declared, &missing))
                .unwrap(),
            Verdict::Stale
        );

        let unsettled = [
            ("x", CreateComplete),
            ("y", CreateComplete),
            ("z", Other("UPDATE_FAILED".to_string())),
        ];
        assert_eq!(
            ResourceCompleteness
                .classify(&snapshot(&declared, &unsettled))
                .unwrap(),
            Verdict::Stale
        );

        let extra = [
            ("x", CreateComplete),
            ("y", CreateComplete),
            ("z", CreateComplete),
            ("w", CreateComplete),
        ];
        assert_eq!(
            ResourceCompleteness
                .classify(&snapshot(&declared, &extra))
                .unwrap(),
            Verdict::Stale
        );
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let snapshot = StackSnapshot {
            template: Some(Template::default()),
            live_resources: None,
        };
        assert_eq!(
            ResourceCompleteness.classify(&snapshot),
            Err(ClassifyError::MissingInput {
                classifier: "resource_completeness",
                input: "live resources",
            })
        );
        assert!(RouteCount::new(ROUTE)
            .classify(&StackSnapshot::default())
            .is_err());
    }

    #[test]
    fn test_classifier_for_policy() {
        let route = classifier_for(ClassifierPolicy::RouteCount, ROUTE);
        assert_eq!(route.name(), "route_count");
        assert_eq!(route.needs(), InventoryNeeds::TEMPLATE_ONLY);

        let completeness = classifier_for(ClassifierPolicy::ResourceCompleteness, ROUTE);
        assert_eq!(completeness.name(), "resource_completeness");
        assert_eq!(completeness.needs(), InventoryNeeds::TEMPLATE_AND_LIVE);
    }
}
