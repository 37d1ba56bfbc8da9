//! Integration tests for the heartbeat driving a configured engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stratum::core::{ActionRequest, CoreResult, Extension, ExtensionContext, Severity, SystemId, Value};
use stratum::states::{MachineEvent, StateNode, StateRegistry};
use stratum::{EngineConfig, EngineError, EngineEvent, Heartbeat, HeartbeatConfig};

const CONFIG: &str = r#"
initial = "field"

[heartbeat]
tick_interval_ms = 1
stop_on_fatal = true

[[state]]
path = "field"
scene = "field"

[[state.entity]]
name = "rover"
attributes = { battery = 3 }

[[state]]
path = "dock"
"#;

/// Counts "ping" requests and how often its system ran.
struct Radio {
    pings: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl Extension for Radio {
    fn name(&self) -> &str {
        "radio"
    }

    fn system(&self) -> SystemId {
        SystemId::new("comms")
    }

    fn action_keys(&self) -> Vec<String> {
        vec!["ping".into()]
    }

    fn publish(&mut self, ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        let pings = i64::try_from(self.pings.load(Ordering::SeqCst)).unwrap_or(i64::MAX);
        ctx.publicize("pings", pings)
    }

    fn handle_action(&mut self, _request: &ActionRequest, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update(&mut self, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn engine() -> (Heartbeat, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let heartbeat = Heartbeat::from_config(&config, &StateRegistry::new()).unwrap();

    let (pings, updates) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let rover = heartbeat.machine().active_scenes()[0].entity("rover").unwrap();
    rover
        .add_extension(Box::new(Radio {
            pings: Arc::clone(&pings),
            updates: Arc::clone(&updates),
        }))
        .unwrap();
    (heartbeat, pings, updates)
}

#[test]
fn test_config_builds_running_engine() {
    let (heartbeat, _, _) = engine();
    assert_eq!(heartbeat.machine().active_path(), "root/field");
    assert_eq!(heartbeat.config().tick_interval_ms, 1);

    let rover = heartbeat.machine().active_scenes()[0].entity("rover").unwrap();
    assert_eq!(rover.get_attribute("battery"), Some(Value::Int(3)));

    let entered: Vec<_> = heartbeat
        .events()
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Machine(MachineEvent::Entered { path }) => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(entered, vec!["root", "root/field"]);
}

#[test]
fn test_tick_runs_required_systems() {
    let (mut heartbeat, pings, updates) = engine();
    assert_eq!(heartbeat.machine().required_systems(), vec![SystemId::new("comms")]);

    let rover = heartbeat.machine().active_scenes()[0].entity("rover").unwrap();
    for _ in 0..4 {
        rover.request_action("base", "ping", vec![]).unwrap();
    }

    let stats = heartbeat.tick().unwrap();
    assert_eq!(stats.systems, 1);
    assert_eq!(stats.extensions, 1);
    assert_eq!(stats.requests, 4);
    assert_eq!(pings.load(Ordering::SeqCst), 4);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // Publication happens during the state update, before systems run.
    heartbeat.tick().unwrap();
    assert_eq!(rover.get_attribute("pings"), Some(Value::Int(4)));
}

#[test]
fn test_systems_stop_running_when_scene_is_left() {
    let (mut heartbeat, _, updates) = engine();
    heartbeat.tick().unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    assert!(heartbeat.machine().transition_handle().request("dock"));
    let stats = heartbeat.tick().unwrap();
    assert_eq!(stats.transitions, 1);
    assert_eq!(stats.systems, 0);
    assert_eq!(heartbeat.machine().active_path(), "root/dock");

    heartbeat.run_for(3).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unhandled_action_is_fatal() {
    let (mut heartbeat, _, _) = engine();
    let rover = heartbeat.machine().active_scenes()[0].entity("rover").unwrap();
    let radio = rover.extension("radio").unwrap();
    radio.enqueue(Arc::new(ActionRequest::new("intruder", "jam", vec![])));

    let err = heartbeat.tick().unwrap_err();
    assert!(matches!(err, EngineError::Core(_)));
    assert_eq!(err.severity(), Severity::Fatal);

    // The offending request is consumed, later ticks run normally.
    assert_eq!(heartbeat.run_for(5).unwrap(), 5);

    let failures = heartbeat
        .events()
        .drain()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::TickFailed { fatal: true, .. }))
        .count();
    assert_eq!(failures, 1);
}

#[test]
fn test_custom_state_kinds_from_registry() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let mut registry = StateRegistry::new();
    registry
        .register("watched", move |name: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            StateNode::new(name)
        })
        .unwrap();

    let config = EngineConfig::from_toml_str(
        r#"
        initial = "a/b"

        [[state]]
        path = "a"
        kind = "watched"

        [[state]]
        path = "a/b"
        kind = "watched"
        "#,
    )
    .unwrap();

    let heartbeat = Heartbeat::from_config(&config, &registry).unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(heartbeat.machine().active_path(), "root/a/b");
}

#[test]
fn test_threaded_heartbeat_applies_external_requests() {
    let (heartbeat, _, updates) = engine();
    let handle = heartbeat.spawn().unwrap();

    while updates.load(Ordering::SeqCst) < 2 {
        std::thread::yield_now();
    }
    assert!(handle.machine().transition_handle().request("dock"));
    while handle.machine().active_path() != "root/dock" {
        std::thread::yield_now();
    }

    let mut heartbeat = handle.stop().unwrap();
    assert!(heartbeat.tick_count() >= 3);
    let _ = heartbeat.events().drain();
    heartbeat.shutdown(true).unwrap();
    assert!(!heartbeat.machine().is_running());
    assert!(heartbeat
        .events()
        .drain()
        .contains(&EngineEvent::Stopped { ticks: heartbeat.tick_count() }));
}

#[test]
fn test_bad_initial_state_fails_startup() {
    let config = EngineConfig {
        initial: "nowhere".into(),
        heartbeat: HeartbeatConfig::default(),
        states: Vec::new(),
    };
    assert!(matches!(
        Heartbeat::from_config(&config, &StateRegistry::new()),
        Err(EngineError::State(_))
    ));
}
