use std::sync::{Arc, atomic::AtomicBool};

use crate::message::{Message, RulesetRef};

/// spec.md §3: "only `DISC` is observed by the dispatcher as already
/// consumed". `New`/`Sub`/`Bad` are carried through for parity with the
/// upstream batch-state vocabulary even though this dispatcher only branches
/// on `Disc`; a parser stage further up the pipeline is the natural place to
/// set `Bad`/`Sub`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    New,
    Sub,
    Bad,
    Disc,
}

/// One slot in a [`Batch`]: a message plus its processing state and the
/// ruleset it was tagged with at enqueue time.
#[derive(Clone)]
pub struct BatchElem {
    pub payload: Arc<Message>,
    pub state: BatchState,
    pub ruleset: Option<RulesetRef>,
}

/// A contiguous, indexable collection of message slots dispatched together.
///
/// Invariant (spec.md §3): when `single_ruleset` is true, every non-`Disc`
/// slot's ruleset must equal the batch's ruleset. The dispatcher establishes
/// this invariant for the fast path on entry and for every temporary batch
/// it allocates while partitioning.
pub struct Batch {
    elems: Vec<BatchElem>,
    single_ruleset: bool,
    /// Meaningful only when `single_ruleset` is true — mirrors the C
    /// `batchGetRuleset` that reads elem 0's ruleset for the whole batch.
    ruleset: Option<RulesetRef>,
    shutdown_immediate: Arc<AtomicBool>,
}

impl Batch {
    pub fn new(capacity: usize, shutdown_immediate: Arc<AtomicBool>) -> Self {
        Self {
            elems: Vec::with_capacity(capacity),
            single_ruleset: false,
            ruleset: None,
            shutdown_immediate,
        }
    }

    pub fn push(&mut self, payload: Arc<Message>, ruleset: Option<RulesetRef>) {
        if self.elems.is_empty() {
            self.ruleset = ruleset.clone();
        }
        self.elems.push(BatchElem { payload, state: BatchState::New, ruleset });
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.elems.capacity()
    }

    pub fn single_ruleset(&self) -> bool {
        self.single_ruleset
    }

    pub fn set_single_ruleset(&mut self, value: bool) {
        self.single_ruleset = value;
    }

    pub fn ruleset(&self) -> Option<&RulesetRef> {
        self.ruleset.as_ref()
    }

    pub fn set_ruleset(&mut self, ruleset: Option<RulesetRef>) {
        self.ruleset = ruleset;
    }

    pub fn shutdown_immediate(&self) -> &Arc<AtomicBool> {
        &self.shutdown_immediate
    }

    pub fn elem(&self, i: usize) -> &BatchElem {
        &self.elems[i]
    }

    pub fn elem_ruleset(&self, i: usize) -> Option<&RulesetRef> {
        self.elems[i].ruleset.as_ref()
    }

    pub fn mark_disc(&mut self, i: usize) {
        self.elems[i].state = BatchState::Disc;
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchElem> {
        self.elems.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BatchElem> {
        self.elems.iter_mut()
    }

    /// First index whose state is not `Disc`, the slow-path partition seed
    /// (`iStart` in the original `processBatchMultiRuleset`).
    pub fn first_unprocessed(&self) -> Option<usize> {
        self.elems.iter().position(|e| e.state != BatchState::Disc)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;

    fn msg(payload: &str) -> Arc<Message> {
        Arc::new(Message::new(
            payload.as_bytes().to_vec(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
            "test",
        ))
    }

    #[test]
    fn first_unprocessed_skips_discarded() {
        let mut b = Batch::new(4, Arc::new(AtomicBool::new(false)));
        b.push(msg("a"), None);
        b.push(msg("b"), None);
        b.mark_disc(0);
        assert_eq!(b.first_unprocessed(), Some(1));
        b.mark_disc(1);
        assert_eq!(b.first_unprocessed(), None);
    }

    #[test]
    fn single_element_batch_records_its_ruleset() {
        let mut b = Batch::new(1, Arc::new(AtomicBool::new(false)));
        assert!(b.ruleset().is_none());
        b.push(msg("a"), None);
        assert!(b.ruleset().is_none());
    }
}
