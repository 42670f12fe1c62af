use std::sync::{Arc, atomic::Ordering};

use tracing::{debug, trace, warn};

use crate::{
    batch::{Batch, BatchState},
    error::DispatchError,
    message::RulesetRef,
    registry::{Registry, Ruleset},
};

/// Picks the ruleset a batch (or an element within it) should run through:
/// its own tagged ruleset if it still resolves, else the registry default
/// (spec.md §4.6 `processBatch`: `pThis = batchGetRuleset(pBatch) ?? pDflt`).
fn effective_ruleset(registry: &Registry, tagged: Option<&RulesetRef>) -> Option<Arc<Ruleset>> {
    tagged.and_then(|rref| registry.resolve(rref)).or_else(|| registry.get_default())
}

/// Runs every rule of `ruleset` over `batch`. Short-circuit is a rule-level
/// concern, not the dispatcher's (spec.md §4.6): the dispatcher iterates all
/// rules unconditionally, even after `shutdown_immediate` has been observed.
/// A rule or action that wants to skip work under shutdown checks the flag
/// itself.
fn run_rules(ruleset: &Ruleset, batch: &mut Batch) {
    if batch.shutdown_immediate().load(Ordering::Relaxed) {
        trace!("running rules with shutdown_immediate already set");
    }
    for rule in ruleset.rules() {
        rule.process_batch(batch);
    }
}

/// Entry point for driving a batch through its ruleset(s) (spec.md §4.6
/// `processBatch`). Takes the fast, single-ruleset path when `batch` is
/// already homogeneous; otherwise partitions it first.
pub fn process_batch(batch: &mut Batch, registry: &Registry) -> Result<(), DispatchError> {
    if batch.is_empty() {
        return Ok(());
    }
    if batch.single_ruleset() {
        let batch_ruleset_name = batch.ruleset().map(RulesetRef::name);
        inflow_utils::safe_assert!(
            batch.iter().all(|e| e.state == BatchState::Disc || e.ruleset.as_ref().map(RulesetRef::name) == batch_ruleset_name),
            "single-ruleset batch invariant violated: a non-discarded slot's ruleset differs from the batch's ruleset"
        );
        let Some(ruleset) = effective_ruleset(registry, batch.ruleset()) else {
            warn!("batch's ruleset vanished and no default ruleset is configured, dropping batch");
            return Ok(());
        };
        run_rules(&ruleset, batch);
        return Ok(());
    }
    process_batch_multi_ruleset(batch, registry)
}

/// Slow path (spec.md §4.6 `processBatchMultiRuleset`): repeatedly finds the
/// first not-yet-dispatched element, copies every element sharing its
/// ruleset into a temporary single-ruleset batch (marking the originals
/// `Disc`), and recurses. Ordering is preserved within each ruleset's
/// partition, not across partitions — intentional, per the same section.
fn process_batch_multi_ruleset(batch: &mut Batch, registry: &Registry) -> Result<(), DispatchError> {
    loop {
        let Some(start) = batch.first_unprocessed() else {
            break;
        };
        let seed_name = batch.elem_ruleset(start).map(RulesetRef::name).map(str::to_owned);

        let mut temp = Batch::new(batch.len() - start, batch.shutdown_immediate().clone());
        temp.set_single_ruleset(true);
        temp.set_ruleset(batch.elem_ruleset(start).cloned());

        for i in start..batch.len() {
            if batch.elem(i).state == BatchState::Disc {
                continue;
            }
            let elem_name = batch.elem_ruleset(i).map(RulesetRef::name);
            if elem_name != seed_name.as_deref() {
                continue;
            }
            let elem = batch.elem(i).clone();
            temp.push(elem.payload, elem.ruleset);
            batch.mark_disc(i);
        }

        debug!(
            ruleset = seed_name.as_deref().unwrap_or("<default>"),
            elems = temp.len(),
            "dispatched partition to single-ruleset batch"
        );
        process_batch(&mut temp, registry)?;

        if batch.shutdown_immediate().load(Ordering::Relaxed) {
            debug!("shutdown observed while partitioning, aborting remaining partitions");
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{
        message::Message,
        rule::{Action, ActionError, FilterRule},
    };

    struct CountingAction(Arc<AtomicUsize>);
    impl Action for CountingAction {
        fn name(&self) -> &str {
            "count"
        }

        fn invoke(&self, _message: &[u8]) -> Result<(), ActionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn msg(payload: &str) -> Arc<Message> {
        Arc::new(Message::new(
            payload.as_bytes().to_vec(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
            "test",
        ))
    }

    #[test]
    fn single_ruleset_batch_runs_its_own_rules() {
        let registry = Registry::new(16);
        let counter = Arc::new(AtomicUsize::new(0));
        let rs = registry.construct("r1");
        rs.add_rule(Arc::new(FilterRule::catch_all(
            "all",
            vec![Box::new(CountingAction(counter.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs.clone()).unwrap();

        let rref = RulesetRef::new(&rs);
        let mut batch = Batch::new(2, Arc::new(AtomicBool::new(false)));
        batch.set_single_ruleset(true);
        batch.push(msg("a"), Some(rref.clone()));
        batch.push(msg("b"), Some(rref));

        process_batch(&mut batch, &registry).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn vanished_ruleset_with_no_default_drops_batch_without_error() {
        let registry = Registry::new(16);
        let rs = registry.construct("gone");
        let rref = RulesetRef::new(&rs);
        drop(rs);
        registry.destruct_all_actions();

        let mut batch = Batch::new(1, Arc::new(AtomicBool::new(false)));
        batch.set_single_ruleset(true);
        batch.push(msg("a"), Some(rref));
        assert!(process_batch(&mut batch, &registry).is_ok());
    }

    #[test]
    fn multi_ruleset_batch_partitions_and_preserves_each_rulesets_order() {
        let registry = Registry::new(16);
        let order_a = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_b = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct RecordingAction(Arc<std::sync::Mutex<Vec<u8>>>);
        impl Action for RecordingAction {
            fn name(&self) -> &str {
                "record"
            }

            fn invoke(&self, message: &[u8]) -> Result<(), ActionError> {
                self.0.lock().unwrap().push(message[0]);
                Ok(())
            }
        }

        let rs_a = registry.construct("a");
        rs_a.add_rule(Arc::new(FilterRule::catch_all(
            "a-rule",
            vec![Box::new(RecordingAction(order_a.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs_a.clone()).unwrap();

        let rs_b = registry.construct("b");
        rs_b.add_rule(Arc::new(FilterRule::catch_all(
            "b-rule",
            vec![Box::new(RecordingAction(order_b.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs_b.clone()).unwrap();

        let rref_a = RulesetRef::new(&rs_a);
        let rref_b = RulesetRef::new(&rs_b);

        let mut batch = Batch::new(4, Arc::new(AtomicBool::new(false)));
        batch.push(msg("\x01"), Some(rref_a.clone()));
        batch.push(msg("\x02"), Some(rref_b.clone()));
        batch.push(msg("\x03"), Some(rref_a));
        batch.push(msg("\x04"), Some(rref_b));

        process_batch(&mut batch, &registry).unwrap();

        assert_eq!(*order_a.lock().unwrap(), vec![1, 3]);
        assert_eq!(*order_b.lock().unwrap(), vec![2, 4]);
    }

    #[test]
    fn shutdown_between_rules_does_not_abort_remaining_rules() {
        let registry = Registry::new(16);
        let counter = Arc::new(AtomicUsize::new(0));
        let rs = registry.construct("r1");

        struct ShutdownTriggerAction(Arc<AtomicBool>);
        impl Action for ShutdownTriggerAction {
            fn name(&self) -> &str {
                "trigger-shutdown"
            }

            fn invoke(&self, _message: &[u8]) -> Result<(), ActionError> {
                self.0.store(true, Ordering::Relaxed);
                Ok(())
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        rs.add_rule(Arc::new(FilterRule::catch_all(
            "first",
            vec![Box::new(ShutdownTriggerAction(shutdown.clone()))],
        )))
        .unwrap();
        rs.add_rule(Arc::new(FilterRule::catch_all(
            "second",
            vec![Box::new(CountingAction(counter.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs.clone()).unwrap();

        let rref = RulesetRef::new(&rs);
        let mut batch = Batch::new(1, shutdown);
        batch.set_single_ruleset(true);
        batch.push(msg("a"), Some(rref));

        process_batch(&mut batch, &registry).unwrap();
        // the first rule flips shutdown_immediate mid-ruleset; the dispatcher
        // still runs the second rule, since short-circuiting is a rule/action
        // concern, not the dispatcher's.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
