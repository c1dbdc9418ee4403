//! Wire shapes for the line-delimited JSON stdio loop, matching spec.md §6's
//! tool-facing contract: each transition names one of the five trigger verbs
//! (`start`/`complete`/`cancel`/`block`/`hold`), not a target status — `start`
//! is resolved against the active flow by C4, the rest map to a fixed status.

use serde::{Deserialize, Serialize};

use workflow_core::models::{ContainerType, EntityId, Trigger};
use workflow_core::orchestrator::{BatchResult, TransitionOutcome, TransitionRequest};

#[derive(Debug, Deserialize)]
pub struct WireBatchRequest {
    pub transitions: Vec<WireTransitionRequest>,
}

#[derive(Debug, Deserialize)]
pub struct WireTransitionRequest {
    pub container_id: String,
    pub container_type: String,
    pub trigger: String,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WireBatchResponse {
    pub success: bool,
    pub message: String,
    pub data: WireBatchData,
}

#[derive(Debug, Serialize)]
pub struct WireBatchData {
    pub results: Vec<WireTransitionResult>,
    pub summary: WireSummary,
}

#[derive(Debug, Serialize)]
pub struct WireSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(rename = "allUnblockedTasks", skip_serializing_if = "Vec::is_empty")]
    pub all_unblocked_tasks: Vec<String>,
    #[serde(rename = "cascadesApplied")]
    pub cascades_applied: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WireTransitionResult {
    Success {
        #[serde(rename = "containerId")]
        container_id: String,
        #[serde(rename = "containerType")]
        container_type: String,
        #[serde(rename = "previousStatus")]
        previous_status: String,
        #[serde(rename = "newStatus")]
        new_status: String,
        applied: bool,
        #[serde(rename = "newRole", skip_serializing_if = "Option::is_none")]
        new_role: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        advisory: Option<String>,
        #[serde(rename = "cascadeEvents", skip_serializing_if = "Vec::is_empty")]
        cascade_events: Vec<String>,
        #[serde(rename = "unblockedTasks", skip_serializing_if = "Vec::is_empty")]
        unblocked_tasks: Vec<String>,
        #[serde(rename = "activeFlow", skip_serializing_if = "Option::is_none")]
        active_flow: Option<String>,
        #[serde(rename = "flowSequence", skip_serializing_if = "Option::is_none")]
        flow_sequence: Option<Vec<String>>,
        #[serde(rename = "flowPosition", skip_serializing_if = "Option::is_none")]
        flow_position: Option<i32>,
    },
    Failure {
        applied: bool,
        #[serde(rename = "containerId")]
        container_id: String,
        #[serde(rename = "containerType")]
        container_type: String,
        error: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
}

/// Parse one request line into the engine-facing request batch. Returns a
/// human-readable message on malformed JSON or an unknown `container_type`;
/// the stdio loop surfaces that as a top-level failure rather than a
/// per-item one, since at that point there is no valid item to attach it to.
pub fn parse_batch(line: &str) -> Result<Vec<TransitionRequest>, String> {
    let wire: WireBatchRequest =
        serde_json::from_str(line).map_err(|e| format!("malformed request: {e}"))?;

    wire.transitions
        .into_iter()
        .map(|t| {
            let container_type = parse_container_type(&t.container_type)?;
            let trigger = parse_trigger(&t.trigger)?;
            let entity_id: EntityId = t
                .container_id
                .parse()
                .map_err(|_| format!("invalid containerId: {}", t.container_id))?;
            Ok(TransitionRequest {
                container_type,
                entity_id,
                trigger,
                expected_version: t.expected_version,
            })
        })
        .collect()
}

fn parse_container_type(raw: &str) -> Result<ContainerType, String> {
    match raw {
        "task" => Ok(ContainerType::Task),
        "feature" => Ok(ContainerType::Feature),
        "project" => Ok(ContainerType::Project),
        other => Err(format!("unknown containerType: {other}")),
    }
}

fn parse_trigger(raw: &str) -> Result<Trigger, String> {
    raw.parse()
}

pub fn to_wire_response(batch: BatchResult) -> WireBatchResponse {
    let total = batch.results.len();
    let succeeded = batch.succeeded_count();
    let failed = batch.failed_count();
    let all_unblocked_tasks: Vec<String> =
        batch.all_unblocked_tasks().iter().map(|id| id.to_string()).collect();
    let cascades_applied = batch.cascades_applied();

    let results = batch
        .results
        .into_iter()
        .map(|outcome| match outcome {
            TransitionOutcome::Success {
                entity_id,
                container_type,
                from_status,
                to_status,
                role,
                advisory,
                flow,
                cascades,
                unblocked_tasks,
                ..
            } => WireTransitionResult::Success {
                container_id: entity_id.to_string(),
                container_type: container_type.as_str().to_string(),
                previous_status: from_status.as_str().to_string(),
                new_status: to_status.as_str().to_string(),
                applied: true,
                new_role: role.map(|r| format!("{r:?}").to_lowercase()),
                advisory,
                cascade_events: cascades
                    .into_iter()
                    .map(|c| format!("{:?}", c.event))
                    .collect(),
                unblocked_tasks: unblocked_tasks.iter().map(|id| id.to_string()).collect(),
                active_flow: flow.as_ref().map(|f| f.active_flow.clone()),
                flow_sequence: flow.as_ref().map(|f| f.flow_sequence.clone()),
                flow_position: flow.as_ref().map(|f| f.position),
            },
            TransitionOutcome::Failure {
                entity_id,
                container_type,
                message,
                suggestions,
                ..
            } => WireTransitionResult::Failure {
                applied: false,
                container_id: entity_id.to_string(),
                container_type: container_type.as_str().to_string(),
                error: message,
                suggestions,
            },
        })
        .collect();

    WireBatchResponse {
        success: failed == 0,
        message: format!("{succeeded}/{total} transitions applied"),
        data: WireBatchData {
            results,
            summary: WireSummary {
                total,
                succeeded,
                failed,
                all_unblocked_tasks,
                cascades_applied,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_batch_rejects_unknown_container_type() {
        let line = r#"{"transitions":[{"container_id":"not-a-uuid","container_type":"widget","trigger":"complete"}]}"#;
        let result = parse_batch(line);
        assert!(result.is_err());
    }

    #[test]
    fn parse_batch_rejects_unknown_trigger() {
        let id = EntityId::new();
        let line = format!(
            r#"{{"transitions":[{{"container_id":"{id}","container_type":"task","trigger":"finish"}}]}}"#
        );
        assert!(parse_batch(&line).is_err());
    }

    #[test]
    fn parse_batch_rejects_malformed_json() {
        assert!(parse_batch("not json").is_err());
    }

    #[test]
    fn parse_batch_accepts_well_formed_request() {
        let id = EntityId::new();
        let line = format!(
            r#"{{"transitions":[{{"container_id":"{id}","container_type":"task","trigger":"start","expected_version":1}}]}}"#
        );
        let parsed = parse_batch(&line).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entity_id, id);
        assert_eq!(parsed[0].trigger, Trigger::Start);
        assert_eq!(parsed[0].expected_version, Some(1));
    }
}
