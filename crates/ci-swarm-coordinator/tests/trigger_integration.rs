//! Trigger reconciliation driven by a settings file and a simulated clock

use ci_swarm_coordinator::config::Settings;
use ci_swarm_coordinator::triggers::{TriggerFilter, TriggerReconciler, TriggerState};
use ci_swarm_coordinator::{ControlPlaneClient, ServiceContext, SwarmError};
use ci_swarm_test_utils::fixtures::{event_source_mapping, list_mappings_output, mapping_output};
use ci_swarm_test_utils::{ManualClock, ScriptedRunner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const QUEUE: &str = "arn:aws:sqs:us-east-1:123456789012:jobs";

/// Lambda control plane where each mapping needs `polls` reads after the
/// update before it reports the requested state
fn lambda(polls: &[(&str, u32)], target: &'static str) -> ScriptedRunner {
    let uuids: Vec<String> = polls.iter().map(|(u, _)| u.to_string()).collect();
    let remaining: Mutex<HashMap<String, u32>> =
        Mutex::new(polls.iter().map(|(u, n)| (u.to_string(), *n)).collect());

    ScriptedRunner::new(move |args| {
        let uuid = args
            .iter()
            .position(|a| a == "--uuid")
            .map(|i| args[i + 1].clone())
            .unwrap_or_default();
        match args[1].as_str() {
            "list-event-source-mappings" => {
                let mappings: Vec<_> = uuids
                    .iter()
                    .map(|u| event_source_mapping(u, "worker", QUEUE, "Enabled"))
                    .collect();
                Ok(list_mappings_output(&mappings))
            }
            "update-event-source-mapping" => Ok(mapping_output(&uuid, "Updating")),
            "get-event-source-mapping" => {
                let mut remaining = remaining.lock().unwrap();
                let left = remaining.entry(uuid.clone()).or_insert(0);
                if *left > 1 {
                    *left -= 1;
                    Ok(mapping_output(&uuid, "Updating"))
                } else {
                    Ok(mapping_output(&uuid, target))
                }
            }
            other => anyhow::bail!("unexpected command {other}"),
        }
    })
}

fn reconciler(
    runner: ScriptedRunner,
    settings: &Settings,
    clock: Arc<ManualClock>,
) -> TriggerReconciler<ScriptedRunner, Arc<ManualClock>> {
    let context = ServiceContext::new("us-east-1", "ci", "lambda").unwrap();
    TriggerReconciler::new(ControlPlaneClient::new(context, runner))
        .with_clock(clock)
        .with_config(settings.triggers.reconcile_config())
}

#[tokio::test]
async fn test_disable_every_mapping_of_a_function() {
    let settings = Settings::from_json(r#"{"triggers": {"poll_interval_secs": 5}}"#).unwrap();
    let clock = Arc::new(ManualClock::new());
    let reconciler = reconciler(
        lambda(&[("uuid-a", 1), ("uuid-b", 4)], "Disabled"),
        &settings,
        clock.clone(),
    );

    let filter = TriggerFilter::new().function("worker");
    let listed = reconciler.list_mappings(&filter).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|m| m.state == TriggerState::Enabled));

    let reports = reconciler.set_triggers_state(&filter, false).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].uuid, "uuid-a");
    assert_eq!(reports[0].polls, 1);
    assert_eq!(reports[1].uuid, "uuid-b");
    assert_eq!(reports[1].polls, 4);
    assert!(reports.iter().all(|r| r.state == TriggerState::Disabled));

    // 1 + 4 polls at the configured 5 second cadence
    assert_eq!(clock.elapsed(), Duration::from_secs(25));
    assert!(clock.sleeps().iter().all(|s| *s == Duration::from_secs(5)));

    let runner = reconciler.client().runner();
    let updates = runner.calls_to("update-event-source-mapping");
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|c| c.has_flag("--no-enabled")));
    let list = &runner.calls_to("list-event-source-mappings")[0];
    assert_eq!(list.flag_value("--function-name"), Some("worker"));
    assert!(!list.has_flag("--event-source-arn"));
}

#[tokio::test]
async fn test_short_deadline_from_settings_times_out() {
    let settings = Settings::from_json(
        r#"{"triggers": {"poll_interval_secs": 10, "deadline_secs": 30}}"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new());
    let reconciler = reconciler(lambda(&[("uuid-a", 100)], "Disabled"), &settings, clock.clone());

    let err = reconciler.set_trigger_state("uuid-a", false).await.unwrap_err();
    assert!(matches!(
        err,
        SwarmError::Timeout { ref resource, ref last_state, .. }
            if resource == "uuid-a" && last_state == "Transitioning"
    ));
    assert_eq!(clock.elapsed(), Duration::from_secs(30));
    assert_eq!(
        reconciler
            .client()
            .runner()
            .calls_to("get-event-source-mapping")
            .len(),
        3
    );
}

#[tokio::test]
async fn test_enable_single_mapping() {
    let clock = Arc::new(ManualClock::new());
    let reconciler = reconciler(
        lambda(&[("uuid-a", 2)], "Enabled"),
        &Settings::default(),
        clock.clone(),
    );

    let report = reconciler.set_trigger_state("uuid-a", true).await.unwrap();
    assert_eq!(report.state, TriggerState::Enabled);
    assert_eq!(report.polls, 2);
    assert_eq!(report.elapsed, Duration::from_secs(20));

    let update = &reconciler.client().runner().calls_to("update-event-source-mapping")[0];
    assert!(update.has_flag("--enabled"));
    assert_eq!(update.flag_value("--uuid"), Some("uuid-a"));
}
