#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use buildcoord::dag::{BuildOptions, TaskSetStatus, TaskStatus};
use buildcoord::engine::{CoordinationEngine, EngineOptions};
use buildcoord::exec::ProcessScheduler;
use buildcoord::notify::{EngineEvent, EventBus};
use buildcoord::store::MemoryDatastore;
use buildcoord::types::{ConfigId, TaskSetId, User};
use buildcoord_test_utils::builders::set_of;
use buildcoord_test_utils::{init_tracing, with_timeout};
use tokio::sync::mpsc::UnboundedReceiver;

async fn wait_for_set(events: &mut UnboundedReceiver<EngineEvent>, id: TaskSetId) -> TaskSetStatus {
    loop {
        match events.recv().await {
            Some(EngineEvent::TaskSet(e)) if e.task_set == id && e.finished => return e.to,
            Some(_) => continue,
            None => panic!("event bus closed"),
        }
    }
}

fn engine(store: &MemoryDatastore) -> (CoordinationEngine, UnboundedReceiver<EngineEvent>) {
    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let scheduler = Arc::new(ProcessScheduler::new().unwrap());
    let engine = CoordinationEngine::new(
        Arc::new(store.clone()),
        scheduler,
        bus,
        EngineOptions::default(),
    );
    (engine, events)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_codes_map_to_outcomes() {
    init_tracing();
    let store = MemoryDatastore::new();
    store.add_configuration("ok", "true", []);
    store.add_configuration("bad", "exit 3", []);
    store.add_configuration("after_ok", "echo \"$BUILDCOORD_CONFIGURATION\"", [ConfigId::new("ok")]);
    store.add_configuration("after_bad", "true", [ConfigId::new("bad")]);
    let (engine, mut events) = engine(&store);

    let set = engine
        .submit_set(
            &set_of(&["ok", "bad", "after_ok", "after_bad"]),
            &User::new("ci"),
            BuildOptions::default(),
        )
        .unwrap();

    let status = with_timeout(wait_for_set(&mut events, set.id())).await;
    assert_eq!(status, TaskSetStatus::Failed);

    let by_name = |name: &str| {
        engine
            .tasks_of(&set)
            .into_iter()
            .find(|t| t.key().config == ConfigId::new(name))
            .unwrap()
            .status()
    };
    assert_eq!(by_name("ok"), TaskStatus::Done);
    assert_eq!(by_name("bad"), TaskStatus::DoneWithErrors);
    assert_eq!(by_name("after_ok"), TaskStatus::Done);
    assert_eq!(by_name("after_bad"), TaskStatus::Rejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_kills_the_running_build() {
    init_tracing();
    let store = MemoryDatastore::new();
    store.add_configuration("slow", "sleep 30", []);
    let (engine, mut events) = engine(&store);

    let set = engine
        .submit_set(&set_of(&["slow"]), &User::new("ci"), BuildOptions::default())
        .unwrap();
    let task = engine.tasks_of(&set).pop().unwrap();

    // Give the process a moment to spawn.
    with_timeout(async {
        while task.status() != TaskStatus::Building {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(engine.cancel(task.id()));
    let status = with_timeout(wait_for_set(&mut events, set.id())).await;
    assert_eq!(status, TaskSetStatus::Cancelled);
    assert_eq!(task.status(), TaskStatus::Cancelled);
}
