mod test_fixtures;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_test::assert_ok;

use cascade_core::{FlowId, FlowStatus, FlowVersionId, ProjectId, WebhookJobData};
use cascade_worker::executors::WebhookJobExecutor;
use test_fixtures::*;

fn delivery(simulate: bool, save_sample_data: bool, handler: Option<&str>) -> WebhookJobData {
    WebhookJobData {
        request_id: "req-7".to_string(),
        flow_id: FlowId("flow-1".to_string()),
        flow_version_id: FlowVersionId("fv-1".to_string()),
        project_id: ProjectId("proj-1".to_string()),
        payload: json!({ "body": { "order": 17 } }),
        simulate,
        save_sample_data,
        synchronous_handler_id: handler.map(str::to_string),
    }
}

fn enabled_flow() -> FakeControlPlane {
    FakeControlPlane::new()
        .with_flow(sample_flow("fv-1", FlowStatus::Enabled, Some("fv-1")))
        .with_sample_blocks()
}

fn replied_statuses(h: &Harness) -> Vec<u16> {
    h.api
        .webhook_updates()
        .iter()
        .map(|update| update.response.status)
        .collect()
}

fn sample_data(h: &Harness) -> Vec<Vec<Value>> {
    h.api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::SavePayloads(request) => Some(request.payloads),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_payloads_are_submitted_with_request_lineage() {
    init_test_tracing();
    let h = harness(
        enabled_flow(),
        ScriptedTransport::always(json!({ "success": true, "output": [{ "order": 17 }] })),
    );
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, false, Some("handler-1")), &token()).await);

    let submitted = h.api.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].payloads, vec![json!({ "order": 17 })]);
    assert_eq!(submitted[0].execution_correlation_id, "req-7");
    assert_eq!(submitted[0].synchronous_handler_id.as_deref(), Some("handler-1"));
    // the run answers the synchronous caller, not the worker
    assert!(h.api.webhook_updates().is_empty());
}

#[tokio::test]
async fn test_missing_flow_answers_not_found() {
    let h = harness(FakeControlPlane::new(), ScriptedTransport::always(json!({})));
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, false, Some("handler-1")), &token()).await);

    assert_eq!(replied_statuses(&h), vec![404]);
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_missing_flow_without_waiting_caller_is_silent() {
    let h = harness(FakeControlPlane::new(), ScriptedTransport::always(json!({})));
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, false, None), &token()).await);

    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn test_disabled_flow_answers_not_found() {
    let h = harness(
        FakeControlPlane::new()
            .with_flow(sample_flow("fv-1", FlowStatus::Disabled, Some("fv-1")))
            .with_sample_blocks(),
        ScriptedTransport::always(json!({ "success": true, "output": ["p1"] })),
    );
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, false, Some("handler-1")), &token()).await);

    assert_eq!(replied_statuses(&h), vec![404]);
    assert!(h.api.submitted().is_empty());
}

#[tokio::test]
async fn test_simulation_saves_sample_data_only() {
    let h = harness(
        enabled_flow(),
        ScriptedTransport::always(json!({ "success": true, "output": ["sample"] })),
    );
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(true, false, None), &token()).await);

    assert_eq!(sample_data(&h), vec![vec![json!("sample")]]);
    assert!(h
        .api
        .calls()
        .iter()
        .any(|call| matches!(call, ApiCall::DeleteWebhookSimulation(_))));
    assert!(h.api.submitted().is_empty());

    let hook = &h.transport.requests()[0];
    assert_eq!(hook.engine_input["test"], json!(true));
}

#[tokio::test]
async fn test_sample_data_is_saved_alongside_submission() {
    let h = harness(
        enabled_flow(),
        ScriptedTransport::always(json!({ "success": true, "output": ["p1"] })),
    );
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, true, None), &token()).await);

    assert_eq!(sample_data(&h), vec![vec![json!("p1")]]);
    assert_eq!(h.api.submitted().len(), 1);
}

#[tokio::test]
async fn test_no_payloads_answers_no_content() {
    let h = harness(enabled_flow(), ScriptedTransport::always(json!({ "success": true, "output": [] })));
    let executor = WebhookJobExecutor::new(Arc::clone(&h.services));

    assert_ok!(executor.execute(&delivery(false, false, Some("handler-1")), &token()).await);

    assert_eq!(replied_statuses(&h), vec![204]);
    assert!(h.api.submitted().is_empty());
}
