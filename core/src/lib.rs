//! Workflow Core Library
//!
//! Foundational domain models, business logic, and trait interfaces for the
//! workflow state engine. All other crates in this workspace depend on the
//! types defined here.
//!
//! # Architecture
//!
//! - [`models`] - container hierarchy (project/feature/task), sections, dependencies
//! - [`error`] - closed error sum type and result alias
//! - [`store`] - `EntityStore` trait: transactional persistence (C1)
//! - [`config`] - workflow YAML config loading and flow resolution (C2)
//! - [`validator`] - status and transition validation (C3)
//! - [`progression`] - ready/blocked/terminal progression decisions (C4)
//! - [`verification`] - completion verification gate (C5)
//! - [`cascade`] - automatic follow-on status changes (C6)
//! - [`orchestrator`] - the batch transition entry point (C7)

pub mod cascade;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progression;
pub mod store;
pub mod validator;
pub mod verification;

pub use cascade::{AppliedCascade, CascadeEvent, CascadeService, TransitionedEntity};
pub use config::{ConfigMode, FlowPath, WorkflowConfig, WorkflowConfigLoader};
pub use error::{EngineError, Result};
pub use models::{
    ContainerType, ContentFormat, Dependency, DependencyType, EntityId, Feature, FeatureCounts,
    NewFeature, NewProject, NewTask, Priority, Project, Role, Section, Status, Task, TaskCounts,
};
pub use orchestrator::{BatchResult, FlowSummary, TransitionOrchestrator, TransitionOutcome, TransitionRequest};
pub use progression::{ProgressionContext, ProgressionOutcome, ProgressionService};
pub use store::EntityStore;
pub use validator::{PrerequisiteContext, StatusValidator, ValidationOutcome};
pub use verification::{GateOutcome, VerificationCriterion, VerificationGate};

/// Current version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name.
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_constants_are_set() {
        assert!(!VERSION.is_empty());
        assert_eq!(CRATE_NAME, "workflow-core");
    }
}
