//! Verification Gate (C5): reads the "Verification" section attached to an
//! entity and decides whether a completion transition may proceed.
//!
//! Grounded on the teacher's `protocol.rs` JSON parsing idiom (parse into a
//! typed `Vec<T>` with `serde_json`, surface malformed input as a specific
//! error variant rather than a generic one) applied to the gate's own sum
//! type instead of the teacher's `McpError`.

use serde::{Deserialize, Serialize};

use crate::models::{ContentFormat, Section};

/// One verification criterion recorded in the "Verification" section body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCriterion {
    pub criteria: String,
    pub pass: bool,
}

/// Result of evaluating a completion gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Ok,
    MissingSection,
    MalformedJson(String),
    Failed { failing_criteria: Vec<String> },
}

impl GateOutcome {
    pub fn passes(&self) -> bool {
        matches!(self, GateOutcome::Ok)
    }
}

pub const VERIFICATION_SECTION_TITLE: &str = "Verification";

pub struct VerificationGate;

impl VerificationGate {
    /// Evaluate the gate for an entity that `requires_verification`. Callers
    /// only invoke this when the entity's `requires_verification` flag is
    /// set; entities that don't require verification always pass implicitly.
    pub fn evaluate(sections: &[Section]) -> GateOutcome {
        let section = sections.iter().find(|s| {
            s.title.eq_ignore_ascii_case(VERIFICATION_SECTION_TITLE)
                && s.content_format == ContentFormat::Json
        });

        let section = match section {
            Some(section) => section,
            None => return GateOutcome::MissingSection,
        };

        let criteria: Vec<VerificationCriterion> =
            match serde_json::from_str(&section.content) {
                Ok(criteria) => criteria,
                Err(err) => return GateOutcome::MalformedJson(err.to_string()),
            };

        let failing: Vec<String> = criteria
            .into_iter()
            .filter(|c| !c.pass)
            .map(|c| c.criteria)
            .collect();

        if failing.is_empty() {
            GateOutcome::Ok
        } else {
            GateOutcome::Failed {
                failing_criteria: failing,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFormat, ContainerType, EntityId};

    fn section_with(content: &str) -> Section {
        Section {
            id: EntityId::new(),
            entity_type: ContainerType::Task,
            entity_id: EntityId::new(),
            title: "Verification".to_string(),
            usage_description: "completion checklist".to_string(),
            content: content.to_string(),
            content_format: ContentFormat::Json,
            ordinal: 0,
            version: 1,
        }
    }

    #[test]
    fn missing_section_blocks() {
        assert_eq!(VerificationGate::evaluate(&[]), GateOutcome::MissingSection);
    }

    #[test]
    fn malformed_json_is_reported_not_silently_failed() {
        let section = section_with("not json");
        match VerificationGate::evaluate(&[section]) {
            GateOutcome::MalformedJson(_) => {}
            other => panic!("expected MalformedJson, got {other:?}"),
        }
    }

    #[test]
    fn all_passing_criteria_is_ok() {
        let section = section_with(r#"[{"criteria":"tests pass","pass":true}]"#);
        assert_eq!(VerificationGate::evaluate(&[section]), GateOutcome::Ok);
    }

    #[test]
    fn failing_criteria_are_named() {
        let section = section_with(
            r#"[{"criteria":"tests pass","pass":true},{"criteria":"docs updated","pass":false}]"#,
        );
        match VerificationGate::evaluate(&[section]) {
            GateOutcome::Failed { failing_criteria } => {
                assert_eq!(failing_criteria, vec!["docs updated".to_string()]);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn title_match_is_case_insensitive() {
        let mut section = section_with(r#"[{"criteria":"x","pass":true}]"#);
        section.title = "verification".to_string();
        assert_eq!(VerificationGate::evaluate(&[section]), GateOutcome::Ok);
    }

    #[test]
    fn title_match_with_wrong_content_format_is_missing() {
        let mut section = section_with(r#"[{"criteria":"x","pass":true}]"#);
        section.content_format = ContentFormat::Markdown;
        assert_eq!(
            VerificationGate::evaluate(&[section]),
            GateOutcome::MissingSection
        );
    }
}
