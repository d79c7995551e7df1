// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod notify;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{BuildOptions, TaskSetStatus, TaskStatus};
use crate::engine::CoordinationEngine;
use crate::exec::ProcessScheduler;
use crate::notify::{EngineEvent, EventBus};
use crate::store::{ConfigurationSet, MemoryDatastore};
use crate::types::{ConfigId, ConfigSetId, TaskId, TaskSetId, User};

/// What the CLI is waiting on.
#[derive(Debug, Clone, Copy)]
enum Target {
    Task(TaskId),
    Set(TaskSetId),
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - datastore / scheduler / notification bus
/// - the coordination engine
/// - Ctrl-C handling
///
/// Returns an error when the requested builds did not all succeed.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let store = Arc::new(MemoryDatastore::from_config(&cfg));
    let bus = Arc::new(EventBus::new());
    let scheduler = Arc::new(ProcessScheduler::new()?);
    let engine = CoordinationEngine::new(store, scheduler, bus.clone(), cfg.engine);

    // Subscribe before submitting so no transition is missed.
    let mut events = bus.subscribe();

    let user = User::new(args.user.clone());
    let mut options = BuildOptions {
        rebuild_all: args.rebuild_all,
        ..BuildOptions::default()
    };
    for name in &args.record_sets {
        options = options.with_record_set(name.clone());
    }

    let target = if let Some(name) = &args.build {
        let task = engine.submit_build(&ConfigId::new(name.clone()), &user, options)?;
        Target::Task(task.id())
    } else {
        let set = match &args.set {
            Some(name) => engine.submit_named_set(&ConfigSetId::new(name.clone()), &user, options)?,
            None => {
                let all = ConfigurationSet::new(
                    "all",
                    cfg.configuration.keys().map(|k| ConfigId::new(k.clone())),
                );
                engine.submit_set(&all, &user, options)?
            }
        };
        Target::Set(set.id())
    };
    info!(?target, "submitted; waiting for builds to finish");

    wait_until_finished(&engine, target, &mut events).await?;
    summarize(&engine, target)
}

async fn wait_until_finished(
    engine: &CoordinationEngine,
    target: Target,
    events: &mut mpsc::UnboundedReceiver<EngineEvent>,
) -> Result<()> {
    let mut interrupted = false;
    loop {
        if is_finished(engine, target) {
            return Ok(());
        }

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => bail!("event bus closed before the builds finished"),
            },
            res = tokio::signal::ctrl_c(), if !interrupted => {
                res.context("listening for Ctrl+C")?;
                interrupted = true;
                warn!("interrupted; cancelling outstanding builds");
                match target {
                    Target::Task(id) => {
                        engine.cancel(id);
                    }
                    Target::Set(id) => {
                        let n = engine.cancel_set(id)?;
                        debug!(cancelled = n, "cancel requests applied");
                    }
                }
            }
        }
    }
}

fn is_finished(engine: &CoordinationEngine, target: Target) -> bool {
    match target {
        Target::Task(id) => engine
            .task(id)
            .map(|t| t.status().is_terminal())
            .unwrap_or(true),
        Target::Set(id) => engine.task_set(id).map(|s| s.is_finished()).unwrap_or(true),
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Task(e) => match &e.description {
            Some(why) => println!("[{}] {}: {} -> {} ({why})", e.task, e.key, e.from, e.to),
            None => println!("[{}] {}: {} -> {}", e.task, e.key, e.from, e.to),
        },
        EngineEvent::TaskSet(e) => {
            println!("[{}] {}: {} -> {}", e.task_set, e.config_set, e.from, e.to)
        }
    }
}

fn summarize(engine: &CoordinationEngine, target: Target) -> Result<()> {
    match target {
        Target::Task(id) => {
            let Some(task) = engine.task(id) else {
                bail!("{id} disappeared before it finished");
            };
            let status = task.status();
            println!("{} {}: {}", task.id(), task.key(), status);
            if !matches!(status, TaskStatus::Done | TaskStatus::RejectedAlreadyBuilt) {
                bail!("build of {} ended {status}", task.key());
            }
        }
        Target::Set(id) => {
            let Some(set) = engine.task_set(id) else {
                bail!("{id} disappeared before it finished");
            };
            println!();
            println!("build set {} ({}): {}", set.id(), set.config_set(), set.status());
            for task in engine.tasks_of(&set) {
                println!("  {:<24} {}", task.key().to_string(), task.status());
            }
            if set.status() != TaskSetStatus::Success {
                bail!("build set {} ended {}", set.config_set(), set.status());
            }
        }
    }
    Ok(())
}

/// Print the configurations, sets and engine options without running anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("buildcoord dry-run");
    println!("  engine.cascade_cancellation = {}", cfg.engine.cascade_cancellation);
    println!("  engine.detect_cycles = {}", cfg.engine.detect_cycles);
    println!();

    println!("configurations ({}):", cfg.configuration.len());
    for (name, conf) in cfg.configuration.iter() {
        println!("  - {name} (r{})", conf.revision);
        println!("      script: {}", conf.script);
        if !conf.depends_on.is_empty() {
            let deps: Vec<&str> = conf.depends_on.iter().map(|d| d.as_str()).collect();
            println!("      depends_on: {deps:?}");
        }
    }

    if !cfg.set.is_empty() {
        println!();
        println!("sets ({}):", cfg.set.len());
        for (name, set) in cfg.set.iter() {
            let members: Vec<&str> = set.members.iter().map(|m| m.as_str()).collect();
            println!("  - {name}: {members:?}");
            if let Some(train) = &set.release_train {
                println!("      release_train: {train}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
