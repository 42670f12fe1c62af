mod actions;
mod cli;
mod signals;
mod worker;

use std::{
    fs,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use inflow_config::ConfigLoader;
use inflow_queue::ShutdownPolicy;
use inflow_ruleset::{Batch, FilterRule, Message, ParserRegistry, Registry, iterate_all_actions, process_batch};
use tracing::{error, info, warn};

use crate::{actions::LogAction, cli::Cli, signals::SignalFlags};

const MAIN_QUEUE_CAPACITY: usize = 8192;
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(300);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Installs a default, always-present ruleset so that messages bound to no
/// explicit ruleset (or whose bound ruleset vanished) still have somewhere
/// to land (spec.md §4.6 "effective ruleset" fallback).
fn install_default_ruleset(registry: &Registry) {
    let rs = registry.construct("default");
    let rule: Arc<dyn inflow_ruleset::Rule> =
        Arc::new(FilterRule::catch_all("log-all", vec![Box::new(LogAction::new("log"))]));
    if let Err(err) = rs.add_rule(rule) {
        error!(%err, "failed to attach default action to the default ruleset");
    }
    if let Err(err) = registry.construct_finalize(rs) {
        error!(%err, "failed to register the default ruleset");
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(Registry::new(MAIN_QUEUE_CAPACITY));
    install_default_ruleset(&registry);
    let parsers = ParserRegistry::new();

    let config_text = fs::read_to_string(&cli.config)?;
    let mut loader = ConfigLoader::new();
    loader.begin_load();
    for (lineno, line) in config_text.lines().enumerate() {
        if let Err(err) = loader.process_line(line, &registry, &parsers) {
            error!(line = lineno + 1, %err, "config directive rejected");
            return Err(Box::new(err));
        }
    }
    let module_config = loader.end_load();
    loader.check_config(&registry)?;

    let server_handle = loader.activate_pre_priv_drop(module_config, Arc::clone(&registry))?;
    info!("syslog TCP input activated");

    let worker_shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    let mut queues: Vec<Arc<inflow_queue::Queue<Message>>> = Vec::new();
    let mut seen_queues: Vec<*const ()> = Vec::new();
    for rs in registry.rulesets() {
        let queue = registry.ruleset_queue(&rs);
        let ptr = Arc::as_ptr(&queue).cast::<()>();
        if seen_queues.contains(&ptr) {
            continue;
        }
        seen_queues.push(ptr);
        queues.push(Arc::clone(&queue));
        workers.extend(worker::spawn_workers(
            &format!("worker-{}", rs.name()),
            queue,
            Arc::clone(&registry),
            cli.workers_per_queue,
            Arc::clone(&worker_shutdown),
            ShutdownPolicy::Drain,
        ));
    }
    if !seen_queues.contains(&Arc::as_ptr(&registry.main_queue()).cast::<()>()) {
        let main_queue = registry.main_queue();
        queues.push(Arc::clone(&main_queue));
        workers.extend(worker::spawn_workers(
            "worker-main",
            main_queue,
            Arc::clone(&registry),
            cli.workers_per_queue,
            Arc::clone(&worker_shutdown),
            ShutdownPolicy::Drain,
        ));
    }

    let signals = SignalFlags::register();
    loop {
        if signals.shutdown_requested() {
            break;
        }
        if signals.take_hup() {
            info!("SIGHUP received, sweeping all actions");
            iterate_all_actions(&registry, |action| {
                info!(action = action.name(), "HUP notify");
            });
        }
        thread::sleep(SIGNAL_POLL_INTERVAL);
    }

    info!("shutdown requested, draining sessions");
    server_handle.shutdown(Duration::from_secs(cli.shutdown_grace_secs));
    worker_shutdown.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }

    // Workers honor `ShutdownPolicy::Drain` themselves, but call it again
    // here as a safety net: any message still sitting in a queue after every
    // worker has exited (e.g. one landed in the tiny window between a
    // worker's last dequeue and its exit check) gets dispatched on this
    // thread instead of silently discarded (spec.md §8 scenario #6).
    for queue in &queues {
        let leftover = queue.shutdown(ShutdownPolicy::Drain);
        if leftover.is_empty() {
            continue;
        }
        warn!(count = leftover.len(), "dispatching messages left behind after worker shutdown");
        let mut batch = Batch::new(leftover.len(), Arc::clone(&worker_shutdown));
        for msg in leftover {
            let ruleset = msg.ruleset.clone();
            batch.push(Arc::new(msg), ruleset);
        }
        if let Err(err) = process_batch(&mut batch, &registry) {
            error!(%err, "post-shutdown batch dispatch failed");
        }
    }

    registry.destruct_all_actions();
    info!("shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "daemon exited with error");
            ExitCode::FAILURE
        }
    }
}
