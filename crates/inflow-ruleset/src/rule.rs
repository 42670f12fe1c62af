use tracing::{debug, warn};

use crate::batch::{Batch, BatchState};

/// A single configured action. The action runtime itself is an external
/// collaborator (spec.md §1 "out of scope"); this crate only needs enough
/// of an interface to count actions and to let HUP/shutdown iteration visit
/// them.
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Invoked once per matching, non-discarded message.
    fn invoke(&self, message: &[u8]) -> Result<(), ActionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action '{0}' failed: {1}")]
pub struct ActionError(pub String, pub String);

/// Filter + action chain. Opaque beyond `process_batch`/`iterate_all_actions`
/// per spec.md §3 ("Rule — opaque here").
pub trait Rule: Send + Sync {
    /// Processes every non-discarded element of `batch`. Errors from
    /// individual rules are logged by the dispatcher and do not abort the
    /// batch (spec.md §4.6 "Failure handling").
    fn process_batch(&self, batch: &mut Batch);

    fn iterate_all_actions(&self, f: &mut dyn FnMut(&dyn Action));

    fn action_count(&self) -> usize;

    fn name(&self) -> &str {
        "rule"
    }
}

/// Default rule implementation: a filter predicate over the raw payload plus
/// an ordered action chain. Matches the description in spec.md §3 closely
/// enough to exercise `addRule`'s zero-action rejection and `ProcessBatch`
/// end-to-end without inventing a full RainerScript-equivalent engine.
pub struct FilterRule {
    name: String,
    filter: Box<dyn Fn(&[u8]) -> bool + Send + Sync>,
    actions: Vec<Box<dyn Action>>,
}

impl FilterRule {
    pub fn new(
        name: impl Into<String>,
        filter: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
        actions: Vec<Box<dyn Action>>,
    ) -> Self {
        Self { name: name.into(), filter: Box::new(filter), actions }
    }

    /// A rule whose filter always matches, for rulesets that act on every
    /// incoming message.
    pub fn catch_all(name: impl Into<String>, actions: Vec<Box<dyn Action>>) -> Self {
        Self::new(name, |_| true, actions)
    }
}

impl Rule for FilterRule {
    fn process_batch(&self, batch: &mut Batch) {
        debug!(rule = %self.name, elems = batch.len(), "processing next rule");
        for elem in batch.iter_mut() {
            if elem.state == BatchState::Disc {
                continue;
            }
            if !(self.filter)(&elem.payload.payload) {
                continue;
            }
            for action in &self.actions {
                if let Err(err) = action.invoke(&elem.payload.payload) {
                    warn!(rule = %self.name, action = action.name(), %err, "action failed, continuing");
                }
            }
        }
    }

    fn iterate_all_actions(&self, f: &mut dyn FnMut(&dyn Action)) {
        for action in &self.actions {
            f(action.as_ref());
        }
    }

    fn action_count(&self) -> usize {
        self.actions.len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

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

    #[test]
    fn catch_all_rule_has_no_filter_exclusions() {
        let counter = Arc::new(AtomicUsize::new(0));
        let rule = FilterRule::catch_all("r1", vec![Box::new(CountingAction(counter.clone()))]);
        assert_eq!(rule.action_count(), 1);
        assert_eq!(rule.name(), "r1");
    }
}
