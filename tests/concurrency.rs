use std::sync::{Arc, Barrier};
use std::thread;

use buildcoord::dag::{BuildOptions, FinalStatus, TaskSetStatus, TaskStatus};
use buildcoord::errors::CoordError;
use buildcoord::types::{ConfigId, User};
use buildcoord_test_utils::builders::{set_of, store_with};
use buildcoord_test_utils::fake_scheduler::ManualScheduler;
use buildcoord_test_utils::harness::Harness;
use buildcoord_test_utils::init_tracing;

const ROUNDS: usize = 50;
const THREADS: usize = 8;

#[test]
fn concurrent_submits_of_the_same_revision_dispatch_once() {
    init_tracing();
    for _ in 0..ROUNDS {
        let h = Harness::new(store_with(&[("core", vec![])]), ManualScheduler::new());
        let engine = h.engine.clone();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.submit_build(
                        &ConfigId::new("core"),
                        &User::new(format!("user-{i}")),
                        BuildOptions::default(),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one submit must win");

        let winner = winners[0].id();
        for r in &results {
            if let Err(e) = r {
                match e {
                    CoordError::Conflict { active, .. } => assert_eq!(*active, winner),
                    other => panic!("unexpected error: {other}"),
                }
            }
        }
        assert_eq!(h.scheduler.started(), vec![winner]);
        assert_eq!(h.engine.list_active().len(), 1);
    }
}

#[test]
fn a_dependent_is_released_exactly_once_when_dependencies_finish_together() {
    init_tracing();
    let deps: Vec<String> = (0..THREADS).map(|i| format!("dep{i}")).collect();

    for _ in 0..ROUNDS {
        let mut configs: Vec<(&str, Vec<&str>)> =
            deps.iter().map(|d| (d.as_str(), vec![])).collect();
        configs.push(("top", deps.iter().map(|d| d.as_str()).collect()));
        let h = Harness::new(store_with(&configs), ManualScheduler::new());

        let mut members: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
        members.push("top");
        let set = h
            .engine
            .submit_set(&set_of(&members), &User::new("ci"), BuildOptions::default())
            .unwrap();

        let roots = h.scheduler.started();
        assert_eq!(roots.len(), THREADS);

        let scheduler = Arc::clone(&h.scheduler);
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = roots
            .into_iter()
            .map(|id| {
                let scheduler = Arc::clone(&scheduler);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let reporter = scheduler.reporter(id).unwrap();
                    barrier.wait();
                    reporter.complete(FinalStatus::Success)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        let top = h
            .engine
            .tasks_of(&set)
            .into_iter()
            .find(|t| t.key().config == ConfigId::new("top"))
            .unwrap();
        assert_eq!(h.scheduler.start_count(top.id()), 1);
        assert_eq!(top.status(), TaskStatus::Enqueued);

        h.scheduler.succeed(top.id());
        assert_eq!(set.status(), TaskSetStatus::Success);
    }
}

#[test]
fn racing_failure_and_success_never_release_the_dependent() {
    init_tracing();
    for _ in 0..ROUNDS {
        let store = store_with(&[("a", vec![]), ("b", vec![]), ("c", vec!["a", "b"])]);
        let h = Harness::new(store, ManualScheduler::new());
        let set = h
            .engine
            .submit_set(&set_of(&["a", "b", "c"]), &User::new("ci"), BuildOptions::default())
            .unwrap();

        let started = h.scheduler.started();
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = started
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let reporter = h.scheduler.reporter(id).unwrap();
                let barrier = Arc::clone(&barrier);
                let outcome = if i == 0 {
                    FinalStatus::Failed
                } else {
                    FinalStatus::Success
                };
                thread::spawn(move || {
                    barrier.wait();
                    reporter.complete(outcome)
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let c = h
            .engine
            .tasks_of(&set)
            .into_iter()
            .find(|t| t.key().config == ConfigId::new("c"))
            .unwrap();
        assert_eq!(c.status(), TaskStatus::Rejected);
        assert_eq!(h.scheduler.start_count(c.id()), 0);
        assert_eq!(set.status(), TaskSetStatus::Failed);
        assert!(set.is_finished());
    }
}

#[test]
fn cancel_racing_completion_applies_exactly_one() {
    init_tracing();
    for _ in 0..ROUNDS {
        let h = Harness::new(store_with(&[("core", vec![])]), ManualScheduler::new());
        let task = h
            .engine
            .submit_build(&ConfigId::new("core"), &User::new("ci"), BuildOptions::default())
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reporter = h.scheduler.reporter(task.id()).unwrap();
        let completer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reporter.complete(FinalStatus::Success)
            })
        };
        let canceller = {
            let barrier = Arc::clone(&barrier);
            let engine = h.engine.clone();
            let id = task.id();
            thread::spawn(move || {
                barrier.wait();
                engine.cancel(id)
            })
        };

        let completed = completer.join().unwrap();
        let cancelled = canceller.join().unwrap();
        assert!(completed ^ cancelled, "exactly one transition must win");

        let expected = if completed {
            TaskStatus::Done
        } else {
            TaskStatus::Cancelled
        };
        assert_eq!(task.status(), expected);
        assert!(h.engine.list_active().is_empty());
    }
}

#[test]
fn cancelling_a_dependent_as_it_is_released_reaches_the_scheduler() {
    init_tracing();
    for _ in 0..ROUNDS {
        let store = store_with(&[("base", vec![]), ("app", vec!["base"])]);
        let h = Harness::new(store, ManualScheduler::new());
        let set = h
            .engine
            .submit_set(&set_of(&["base", "app"]), &User::new("ci"), BuildOptions::default())
            .unwrap();
        let base = h.scheduler.started()[0];
        let app = h
            .engine
            .tasks_of(&set)
            .into_iter()
            .find(|t| t.key().config == ConfigId::new("app"))
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reporter = h.scheduler.reporter(base).unwrap();
        let completer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reporter.complete(FinalStatus::Success)
            })
        };
        let canceller = {
            let barrier = Arc::clone(&barrier);
            let engine = h.engine.clone();
            let id = app.id();
            thread::spawn(move || {
                barrier.wait();
                engine.cancel(id)
            })
        };
        assert!(completer.join().unwrap());
        assert!(canceller.join().unwrap());

        assert_eq!(app.status(), TaskStatus::Cancelled);
        if h.scheduler.start_count(app.id()) > 0 {
            assert!(
                h.scheduler.cancelled().contains(&app.id()),
                "a build that reached the scheduler must be cancelled there"
            );
        }
        assert!(h.engine.list_active().is_empty());
        assert_eq!(set.status(), TaskSetStatus::Cancelled);
    }
}

#[test]
fn a_resubmit_racing_a_successful_finish_is_not_built_twice() {
    init_tracing();
    for _ in 0..ROUNDS {
        let h = Harness::new(store_with(&[("core", vec![])]), ManualScheduler::new());
        let first = h
            .engine
            .submit_build(&ConfigId::new("core"), &User::new("ci"), BuildOptions::default())
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reporter = h.scheduler.reporter(first.id()).unwrap();
        let finisher = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reporter.complete(FinalStatus::Success)
            })
        };
        let resubmitter = {
            let barrier = Arc::clone(&barrier);
            let engine = h.engine.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.submit_build(&ConfigId::new("core"), &User::new("bob"), BuildOptions::default())
            })
        };
        assert!(finisher.join().unwrap());

        match resubmitter.join().unwrap() {
            Ok(task) => assert_eq!(task.status(), TaskStatus::RejectedAlreadyBuilt),
            Err(CoordError::Conflict { active, .. }) => assert_eq!(active, first.id()),
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.scheduler.started(), vec![first.id()]);
        assert_eq!(h.store.build_records().len(), 1);
    }
}
