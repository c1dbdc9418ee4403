use std::path::Path;

use workflow_core::config::WorkflowConfigLoader;
use workflow_core::orchestrator::TransitionOrchestrator;
use workflow_core::store::EntityStore;
use workflow_mocks::{new_task_fixture, InMemoryEntityStore};
use workflow_server::protocol::{parse_batch, to_wire_response};

#[tokio::test]
async fn start_trigger_advances_a_fresh_task() {
    let store = InMemoryEntityStore::new();
    let task = store.create_task(new_task_fixture("Fresh task")).await.unwrap();
    let config_loader = WorkflowConfigLoader::new();
    let working_dir = Path::new(".");
    let orchestrator = TransitionOrchestrator::new(&store, &config_loader, working_dir);

    let line = format!(
        r#"{{"transitions":[{{"container_id":"{}","container_type":"task","trigger":"start"}}]}}"#,
        task.id
    );

    let requests = parse_batch(&line).unwrap();
    let batch = orchestrator.apply(requests).await;
    let response = to_wire_response(batch);

    assert!(response.success);
    assert_eq!(response.data.summary.succeeded, 1);
}

#[tokio::test]
async fn malformed_request_line_is_rejected_before_reaching_the_orchestrator() {
    let result = parse_batch("{not valid json");
    assert!(result.is_err());
}

#[tokio::test]
async fn unknown_container_type_is_rejected() {
    let result = parse_batch(
        r#"{"transitions":[{"container_id":"00000000-0000-0000-0000-000000000000","container_type":"widget","trigger":"complete"}]}"#,
    );
    assert!(result.is_err());
}
