use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dialogue_bench::eval::{load_scenarios, ScenarioRunner};
use dialogue_bench::runner::ConversationEvent;

fn scenarios_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/scenarios")
}

#[test]
fn bundled_scenarios_load_in_name_order() {
    let scenarios = load_scenarios(scenarios_dir()).expect("failed to load scenarios");
    let names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["london-reservation", "missing-guest-name", "paris-prompted"]
    );
}

#[tokio::test]
async fn bundled_scenarios_pass_offline() {
    let scenarios = load_scenarios(scenarios_dir()).expect("failed to load scenarios");
    let report = ScenarioRunner::scripted().run(&scenarios).await;

    for case in &report.cases {
        assert!(case.pass, "{} failed: {:?}", case.name, case.failures);
    }
    assert!(report.all_passed());

    let london = &report.cases[0];
    assert_eq!(london.iterations, 3);
    assert_eq!(london.verdict.as_ref().map(|v| v.score), Some(8));

    let missing_name = &report.cases[1];
    assert!(missing_name.verdict.as_ref().map(|v| v.score <= 5).unwrap_or(false));
    assert!(missing_name
        .verdict
        .as_ref()
        .map(|v| v.feedback.contains("guest name"))
        .unwrap_or(false));
}

#[tokio::test]
async fn broken_expectations_fail_the_case() {
    let mut scenarios = load_scenarios(scenarios_dir().join("paris-prompted.yaml"))
        .expect("failed to load scenario");
    scenarios[0].expect.find_hotels = Some("Rome".to_string());
    scenarios[0].expect.no_reservation = true;

    let report = ScenarioRunner::scripted().run(&scenarios).await;
    let case = &report.cases[0];
    assert!(!case.pass);
    assert_eq!(case.failures.len(), 2);
}

#[tokio::test]
async fn events_are_tagged_with_the_scenario_name() {
    let scenarios = load_scenarios(scenarios_dir().join("missing-guest-name.yaml"))
        .expect("failed to load scenario");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    ScenarioRunner::scripted()
        .with_event_callback(move |name, event| {
            sink.lock().expect("lock").push((name.to_string(), event.clone()));
        })
        .run(&scenarios)
        .await;

    let events = seen.lock().expect("lock");
    assert!(events.iter().all(|(name, _)| name == "missing-guest-name"));
    assert_eq!(
        events.last().map(|(_, event)| event.clone()),
        Some(ConversationEvent::Stopped { iterations: 1 })
    );
}
