//! Status Validator (C3): validates a single status string, and validates a
//! `(from, to)` transition under the active flow plus prerequisite rules.
//!
//! A stateless set of associated functions, grounded on the teacher's
//! `TaskValidator` (also a namespace of associated functions over immutable
//! inputs) but returning the three-way sum type spec.md §4.3/§9 calls for
//! instead of a bare `Result<()>`, since "invalid" here always carries
//! suggestions alongside the reason.

use std::collections::BTreeSet;

use crate::config::{resolve_flow_path, ConfigMode, FlowPath};
use crate::models::{ContainerType, EntityId, Status};

/// Three-way validation result. Matches the sum-types-over-subclasses design
/// note: `Valid | ValidWithAdvisory | Invalid`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid,
    ValidWithAdvisory(String),
    Invalid {
        reason: String,
        suggestions: Vec<String>,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, ValidationOutcome::Invalid { .. })
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationOutcome::Invalid {
            reason: reason.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn invalid_with(reason: impl Into<String>, suggestions: Vec<String>) -> Self {
        ValidationOutcome::Invalid {
            reason: reason.into(),
            suggestions,
        }
    }
}

const RECOGNIZED_ENVIRONMENTS: &[&str] =
    &["staging", "production", "prod", "canary", "dev", "development"];

/// Everything the prerequisite rules (spec.md §4.3 table) need, assembled by
/// the orchestrator from store queries before calling `validate_transition`.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteContext {
    /// Number of tasks under the feature being validated.
    pub task_count: Option<u64>,
    /// `(title, status)` for every task under the feature, used by the
    /// feature→testing and feature→completed rules.
    pub child_task_statuses: Option<Vec<(String, Status)>>,
    /// `(name, status)` for every feature under the project, used by the
    /// project→completed rule.
    pub child_feature_statuses: Option<Vec<(String, Status)>>,
    /// `(id, title, status)` of upstream tasks with a `BLOCKS` edge onto the
    /// task being validated, used by the task→in-progress rule.
    pub blocking_tasks: Option<Vec<(EntityId, String, Status)>>,
    /// Trimmed summary length in characters, used by the task→completed rule.
    pub summary_len: Option<usize>,
    /// The terminal-status set for the relevant child container type.
    pub terminal_statuses: BTreeSet<String>,
}

pub struct StatusValidator;

impl StatusValidator {
    /// Validate a status string in isolation (spec.md §4.3 `validateStatus`).
    pub fn validate_status(
        mode: &ConfigMode,
        status: &Status,
        container_type: ContainerType,
        tags: &[String],
    ) -> ValidationOutcome {
        let outcome = match mode {
            ConfigMode::V1Compatible => ValidationOutcome::Valid,
            ConfigMode::V2(config) => {
                match config.status_progression.get(container_type.as_str()) {
                    Some(container_cfg) => {
                        let universe = container_cfg.all_statuses();
                        if universe.contains(status.as_str()) {
                            ValidationOutcome::Valid
                        } else {
                            let mut suggestions: Vec<String> = universe.into_iter().collect();
                            suggestions.sort();
                            ValidationOutcome::invalid_with(
                                format!("'{status}' is not a recognized status for {container_type}"),
                                suggestions,
                            )
                        }
                    }
                    None => ValidationOutcome::Valid,
                }
            }
        };

        if !outcome.is_valid() {
            return outcome;
        }

        if status.as_str() == "deployed" {
            let has_environment_tag = tags.iter().any(|t| {
                RECOGNIZED_ENVIRONMENTS.contains(&t.trim().to_lowercase().as_str())
            });
            if !has_environment_tag {
                return ValidationOutcome::ValidWithAdvisory(
                    "tag this entity with an environment (staging, production, ...) when marking it deployed"
                        .to_string(),
                );
            }
        }

        outcome
    }

    /// Validate a `(from, to)` transition (spec.md §4.3 `validateTransition`).
    pub fn validate_transition(
        mode: &ConfigMode,
        from: &Status,
        to: &Status,
        container_type: ContainerType,
        tags: &[String],
        prereqs: Option<&PrerequisiteContext>,
    ) -> ValidationOutcome {
        let from_outcome = Self::validate_status(mode, from, container_type, tags);
        if !from_outcome.is_valid() {
            return from_outcome;
        }
        let to_outcome = Self::validate_status(mode, to, container_type, tags);
        if !to_outcome.is_valid() {
            return to_outcome;
        }

        if from == to {
            return ValidationOutcome::Valid;
        }

        let config = match mode {
            ConfigMode::V1Compatible => return ValidationOutcome::Valid,
            ConfigMode::V2(config) => config,
        };

        let flow_path = match resolve_flow_path(config, container_type, tags, from) {
            Some(path) => path,
            None => return ValidationOutcome::Valid,
        };

        if flow_path.is_terminal(from) {
            return ValidationOutcome::invalid("transition out of terminal status");
        }

        let validation_cfg = &config.status_validation;

        if flow_path.emergency_transitions.contains(to.as_str()) && validation_cfg.allow_emergency {
            return Self::carry_advisory(to_outcome);
        }

        let from_idx = flow_path.position_of(from);
        let to_idx = flow_path.position_of(to);

        if let (Some(from_idx), Some(to_idx)) = (from_idx, to_idx) {
            if to_idx < from_idx {
                if validation_cfg.allow_backward {
                    return Self::finish(config, &flow_path, to, prereqs, to_outcome);
                }
                return ValidationOutcome::invalid("backward transition disabled");
            }
            if to_idx > from_idx + 1 && validation_cfg.enforce_sequential {
                let suggestion = flow_path
                    .flow_sequence
                    .get(from_idx + 1)
                    .cloned()
                    .into_iter()
                    .collect();
                return ValidationOutcome::invalid_with("cannot skip statuses in flow", suggestion);
            }
            return Self::finish(config, &flow_path, to, prereqs, to_outcome);
        }

        // One or both endpoints are outside the flow sequence but passed
        // per-status validation: manual override.
        Self::finish(config, &flow_path, to, prereqs, to_outcome)
    }

    fn carry_advisory(to_outcome: ValidationOutcome) -> ValidationOutcome {
        to_outcome
    }

    fn finish(
        config: &crate::config::WorkflowConfig,
        flow_path: &FlowPath,
        to: &Status,
        prereqs: Option<&PrerequisiteContext>,
        to_outcome: ValidationOutcome,
    ) -> ValidationOutcome {
        if config.status_validation.validate_prerequisites {
            if let Some(ctx) = prereqs {
                if let Some(outcome) = Self::check_prerequisite(flow_path, to, ctx) {
                    return outcome;
                }
            }
        }
        Self::carry_advisory(to_outcome)
    }

    /// Evaluate the prerequisite rules table (spec.md §4.3). Returns `None`
    /// when no rule applies to `to` (the transition proceeds), or
    /// `Some(Invalid)` when a rule fails.
    fn check_prerequisite(
        _flow_path: &FlowPath,
        to: &Status,
        ctx: &PrerequisiteContext,
    ) -> Option<ValidationOutcome> {
        match to.as_str() {
            "in-development" => {
                let count = ctx.task_count?;
                if count < 1 {
                    return Some(ValidationOutcome::invalid(
                        "feature needs at least one task before entering in-development",
                    ));
                }
                None
            }
            "testing" => {
                let tasks = ctx.child_task_statuses.as_ref()?;
                if tasks.is_empty() {
                    return Some(ValidationOutcome::invalid(
                        "feature has no tasks to move into testing",
                    ));
                }
                let failing: Vec<String> = tasks
                    .iter()
                    .filter(|(_, status)| {
                        status.as_str() != "completed" && !ctx.terminal_statuses.contains(status.as_str())
                    })
                    .map(|(title, _)| title.clone())
                    .collect();
                if !failing.is_empty() {
                    return Some(ValidationOutcome::invalid(format!(
                        "tasks not yet completed or terminal: {}",
                        failing.join(", ")
                    )));
                }
                None
            }
            "completed" => {
                if let Some(tasks) = &ctx.child_task_statuses {
                    let allowed: BTreeSet<&str> = ["completed", "cancelled", "deferred"].into();
                    let failing: Vec<String> = tasks
                        .iter()
                        .filter(|(_, status)| !allowed.contains(status.as_str()))
                        .map(|(title, _)| title.clone())
                        .collect();
                    if !failing.is_empty() {
                        return Some(ValidationOutcome::invalid(format!(
                            "tasks not in a terminal state: {}",
                            failing.join(", ")
                        )));
                    }
                }
                if let Some(features) = &ctx.child_feature_statuses {
                    if features.is_empty() {
                        return Some(ValidationOutcome::invalid(
                            "project has no features to complete",
                        ));
                    }
                    let failing: Vec<String> = features
                        .iter()
                        .filter(|(_, status)| !ctx.terminal_statuses.contains(status.as_str()))
                        .map(|(name, _)| name.clone())
                        .collect();
                    if !failing.is_empty() {
                        return Some(ValidationOutcome::invalid(format!(
                            "features not in a terminal state: {}",
                            failing.join(", ")
                        )));
                    }
                }
                if let Some(len) = ctx.summary_len {
                    if !(300..=500).contains(&len) {
                        return Some(ValidationOutcome::invalid(format!(
                            "task summary must be 300-500 characters, found {len}"
                        )));
                    }
                }
                None
            }
            "in-progress" => {
                let blockers = ctx.blocking_tasks.as_ref()?;
                let active: Vec<&str> = blockers
                    .iter()
                    .filter(|(_, _, status)| {
                        status.as_str() != "completed" && status.as_str() != "cancelled"
                    })
                    .map(|(_, title, _)| title.as_str())
                    .collect();
                if !active.is_empty() {
                    return Some(ValidationOutcome::invalid(format!(
                        "blocked by incomplete task(s): {}",
                        active.join(", ")
                    )));
                }
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;

    fn v2_config() -> ConfigMode {
        let config: WorkflowConfig = serde_yaml::from_str(
            r#"
version: "1"
status_progression:
  task:
    default_flow: [pending, in-progress, testing, completed]
    emergency_transitions: [cancelled]
    terminal_statuses: [completed, cancelled]
  feature:
    default_flow: [planning, in-development, testing, completed]
    terminal_statuses: [completed, cancelled]
status_validation:
  enforce_sequential: true
  allow_backward: false
  allow_emergency: true
  validate_prerequisites: true
"#,
        )
        .unwrap();
        ConfigMode::V2(config)
    }

    #[test]
    fn same_status_is_idempotent_valid() {
        let mode = v2_config();
        let outcome = StatusValidator::validate_transition(
            &mode,
            &Status::new("pending"),
            &Status::new("PENDING"),
            ContainerType::Task,
            &[],
            None,
        );
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn terminal_status_blocks_outgoing_transitions() {
        let mode = v2_config();
        let outcome = StatusValidator::validate_transition(
            &mode,
            &Status::new("completed"),
            &Status::new("in-progress"),
            ContainerType::Task,
            &[],
            None,
        );
        assert!(!outcome.is_valid());
    }

    #[test]
    fn sequential_skip_is_rejected() {
        let mode = v2_config();
        let outcome = StatusValidator::validate_transition(
            &mode,
            &Status::new("pending"),
            &Status::new("completed"),
            ContainerType::Task,
            &[],
            None,
        );
        match outcome {
            ValidationOutcome::Invalid { suggestions, .. } => {
                assert_eq!(suggestions, vec!["in-progress".to_string()]);
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn emergency_transition_allowed_from_any_non_terminal() {
        let mode = v2_config();
        let outcome = StatusValidator::validate_transition(
            &mode,
            &Status::new("pending"),
            &Status::new("cancelled"),
            ContainerType::Task,
            &[],
            None,
        );
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn deployed_without_environment_tag_is_advisory_not_blocking() {
        let mode = ConfigMode::V1Compatible;
        let outcome = StatusValidator::validate_status(
            &mode,
            &Status::new("deployed"),
            ContainerType::Task,
            &[],
        );
        assert!(matches!(outcome, ValidationOutcome::ValidWithAdvisory(_)));

        let outcome = StatusValidator::validate_status(
            &mode,
            &Status::new("deployed"),
            ContainerType::Task,
            &["Production".to_string()],
        );
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn task_summary_boundaries() {
        let mode = v2_config();
        for (len, expect_valid) in [(299, false), (300, true), (500, true), (501, false)] {
            let ctx = PrerequisiteContext {
                summary_len: Some(len),
                terminal_statuses: ["completed", "cancelled"].iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            };
            let outcome = StatusValidator::validate_transition(
                &mode,
                &Status::new("testing"),
                &Status::new("completed"),
                ContainerType::Task,
                &[],
                Some(&ctx),
            );
            assert_eq!(outcome.is_valid(), expect_valid, "len={len}");
        }
    }

    #[test]
    fn blocked_task_cannot_start() {
        let mode = v2_config();
        let ctx = PrerequisiteContext {
            blocking_tasks: Some(vec![(
                EntityId::new(),
                "C".to_string(),
                Status::new("in-progress"),
            )]),
            terminal_statuses: ["completed", "cancelled"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let outcome = StatusValidator::validate_transition(
            &mode,
            &Status::new("pending"),
            &Status::new("in-progress"),
            ContainerType::Task,
            &[],
            Some(&ctx),
        );
        match outcome {
            ValidationOutcome::Invalid { reason, .. } => assert!(reason.contains('C')),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
