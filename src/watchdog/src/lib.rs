//! Decision and teardown engine for tccpf stacks.
//!
//! Every cluster record owns one CloudFormation stack named
//! `cluster-<name>-tccpf`. A reconcile cycle decides whether that stack is
//! still needed and, when it is not, deletes it under a fixed sequence of
//! safety checks:
//!
//! 1. [`gate::ClusterGate`] skips deleted, paused and (optionally)
//!    non-legacy clusters.
//! 2. [`inventory::StackInventoryReader`] reads the template and/or live
//!    resources, whichever the classifier needs.
//! 3. A [`classifier::StalenessClassifier`] returns a [`classifier::Verdict`].
//! 4. [`deleter::GuardedDeleter`] checks the name suffix and every status,
//!    disables termination protection and deletes.
//!
//! [`reconciler::Reconciler`] composes the steps and maps the result to a
//! [`reconciler::ReconcileAction`]; [`scheduler::Scheduler`] drives it for
//! every record of a [`source::ClusterSource`].

pub mod aws;
pub mod classifier;
pub mod cluster;
pub mod config;
pub mod deleter;
pub mod error;
pub mod gate;
pub mod inventory;
pub mod key;
pub mod metrics;
pub mod provider;
pub mod reconciler;
pub mod scheduler;
pub mod source;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classifier::Verdict;
pub use cluster::{ClusterKey, ClusterRecord};
pub use config::EngineConfig;
pub use error::{ProviderError, ProviderErrorKind};
pub use key::StackName;
pub use reconciler::{ReconcileAction, ReconcileError, ReconcileOutcome, Reconciler};
