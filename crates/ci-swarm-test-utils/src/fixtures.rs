//! Canned control-plane responses
//!
//! Shapes mirror what `aws --output json` prints for the commands the
//! coordinator uses.

use ci_swarm_common::CommandOutput;
use serde_json::{Value, json};

/// Unique run ID for test resources.
///
/// Format: `test-{timestamp_ms}-{counter}`.
pub fn test_run_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = chrono::Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}

/// Region for tests that reach a real control plane.
///
/// Checks `AWS_REGION`, then `AWS_DEFAULT_REGION`, then falls back to us-east-2.
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-2".to_string())
}

/// `ec2 run-instances` body with a single instance
pub fn run_instances_body(instance_id: &str) -> Value {
    json!({
        "Groups": [],
        "Instances": [{
            "InstanceId": instance_id,
            "ImageId": "ami-0123456789abcdef0",
            "InstanceType": "t3.medium",
            "State": { "Code": 0, "Name": "pending" }
        }],
        "OwnerId": "123456789012",
        "ReservationId": "r-0123456789abcdef0"
    })
}

/// Successful `ec2 run-instances` output
pub fn run_instances_output(instance_id: &str) -> CommandOutput {
    CommandOutput::success(run_instances_body(instance_id).to_string())
}

/// `ec2 terminate-instances` / `stop-instances` style state-change body
pub fn state_change_output(key: &str, instance_ids: &[&str], current: &str) -> CommandOutput {
    let changes: Vec<Value> = instance_ids
        .iter()
        .map(|id| {
            json!({
                "InstanceId": id,
                "CurrentState": { "Name": current },
                "PreviousState": { "Name": "running" }
            })
        })
        .collect();
    CommandOutput::success(json!({ key: changes }).to_string())
}

/// Single event-source mapping as printed by the lambda commands
pub fn event_source_mapping(uuid: &str, function: &str, source_arn: &str, state: &str) -> Value {
    json!({
        "UUID": uuid,
        "FunctionArn": format!("arn:aws:lambda:us-east-1:123456789012:function:{function}"),
        "EventSourceArn": source_arn,
        "State": state,
        "StateTransitionReason": "USER_INITIATED",
        "BatchSize": 10
    })
}

/// `lambda get-event-source-mapping` output with the given state
pub fn mapping_output(uuid: &str, state: &str) -> CommandOutput {
    CommandOutput::success(
        event_source_mapping(uuid, "worker", "arn:aws:sqs:us-east-1:123456789012:jobs", state)
            .to_string(),
    )
}

/// `lambda list-event-source-mappings` output
pub fn list_mappings_output(mappings: &[Value]) -> CommandOutput {
    CommandOutput::success(json!({ "EventSourceMappings": mappings }).to_string())
}

/// CLI failure in the format the aws CLI prints to stderr
pub fn cli_error(code: &str, operation: &str, message: &str) -> CommandOutput {
    CommandOutput::failure(
        254,
        format!("\nAn error occurred ({code}) when calling the {operation} operation: {message}\n"),
    )
}
