use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use inflow_queue::{Queue, ShutdownPolicy};
use inflow_ruleset::{Batch, Message, Registry, process_batch};
use tracing::{error, warn};

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// How many messages a worker tries to pull into one batch before handing
/// it to the dispatcher (spec.md §3's batch is "a bounded contiguous run
/// of messages dispatched together").
const BATCH_SIZE: usize = 128;

/// One drain loop over a single queue, handed to `process_batch` in
/// contiguous runs. Mirrors the teacher's worker-pool-drains-a-channel
/// shape (`flux`'s tile loop) without the tile machinery this daemon has
/// no use for.
///
/// `shutdown_policy` governs what happens once `shutdown_immediate` is
/// observed (spec.md §4.8, testable scenario #6): `Drain` keeps pulling and
/// dispatching batches until the queue is actually empty before exiting;
/// `Abandon` exits after finishing whatever batch is already in flight,
/// leaving the rest of the backlog unprocessed.
fn drain_loop(
    queue: Arc<Queue<Message>>,
    registry: Arc<Registry>,
    shutdown_immediate: Arc<AtomicBool>,
    shutdown_policy: ShutdownPolicy,
) {
    loop {
        let Some(first) = queue.dequeue_timeout(DEQUEUE_TIMEOUT) else {
            if shutdown_immediate.load(Ordering::Relaxed) {
                return;
            }
            continue;
        };

        let mut batch = Batch::new(BATCH_SIZE, Arc::clone(&shutdown_immediate));
        let first_name = first.ruleset.as_ref().map(inflow_ruleset::RulesetRef::name).map(str::to_string);
        let first_ruleset = first.ruleset.clone();
        batch.push(Arc::new(first), first_ruleset);
        let mut single_ruleset = true;

        while batch.len() < BATCH_SIZE {
            let Some(msg) = queue.try_dequeue() else { break };
            let msg_name = msg.ruleset.as_ref().map(inflow_ruleset::RulesetRef::name);
            if msg_name != first_name.as_deref() {
                single_ruleset = false;
            }
            let ruleset = msg.ruleset.clone();
            batch.push(Arc::new(msg), ruleset);
        }
        batch.set_single_ruleset(single_ruleset);

        if let Err(err) = process_batch(&mut batch, &registry) {
            error!(%err, "batch dispatch failed");
        }

        if shutdown_immediate.load(Ordering::Relaxed) && shutdown_policy == ShutdownPolicy::Abandon {
            return;
        }
    }
}

/// Spawns `count` threads draining `queue`, each independently dispatching
/// through `registry`. Multiple workers on the same queue is safe: the
/// queue is an MPMC channel (spec.md §4.4).
pub fn spawn_workers(
    label: &str,
    queue: Arc<Queue<Message>>,
    registry: Arc<Registry>,
    count: usize,
    shutdown_immediate: Arc<AtomicBool>,
    shutdown_policy: ShutdownPolicy,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|i| {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            let shutdown_immediate = Arc::clone(&shutdown_immediate);
            let fallback_queue = Arc::clone(&queue);
            let fallback_registry = Arc::clone(&registry);
            let fallback_shutdown = Arc::clone(&shutdown_immediate);
            thread::Builder::new()
                .name(format!("{label}-{i}"))
                .spawn(move || drain_loop(queue, registry, shutdown_immediate, shutdown_policy))
                .unwrap_or_else(|err| {
                    warn!(%err, "failed to spawn worker thread, falling back to unnamed spawn");
                    thread::spawn(move || drain_loop(fallback_queue, fallback_registry, fallback_shutdown, shutdown_policy))
                })
        })
        .collect()
}
