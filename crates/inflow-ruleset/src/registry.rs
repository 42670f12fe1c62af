use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use inflow_queue::{Queue, QueueType};
use tracing::{debug, warn};

use crate::{
    error::RulesetError,
    message::{Message, RulesetRef},
    rule::Rule,
};

/// Opaque statement-tree root (spec.md §3: "a root pointer to a statement
/// tree, opaque to this spec"). `addScript` appends to this list; nothing
/// in this crate interprets it.
pub type Statement = Box<dyn std::any::Any + Send + Sync>;

struct RulesetState {
    name: String,
    rules: Vec<Arc<dyn Rule>>,
    queue: Option<Arc<Queue<Message>>>,
    parsers: Vec<String>,
    /// Adding the first parser implicitly disables the default parser set
    /// (spec.md §3 invariant).
    default_parsers_disabled: bool,
    script: Vec<Statement>,
}

/// Named, ordered chain of rules plus an optional private ingress queue and
/// parser list (spec.md §3).
pub struct Ruleset {
    state: Mutex<RulesetState>,
}

impl Ruleset {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RulesetState {
                name,
                rules: Vec::new(),
                queue: None,
                parsers: Vec::new(),
                default_parsers_disabled: false,
                script: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    /// Renaming only updates the ruleset's own name; the registry's lookup
    /// key (captured at `construct_finalize`) is independently owned, per
    /// the "avoid double-free on map key destructors" invariant in spec.md
    /// §4.5 — here that just means a rename does not relocate the map entry.
    pub fn set_name(&self, name: impl Into<String>) {
        self.state.lock().unwrap().name = name.into();
    }

    pub fn add_rule(&self, rule: Arc<dyn Rule>) -> Result<(), RulesetError> {
        if rule.action_count() == 0 {
            warn!("selector line without actions will be discarded");
            return Err(RulesetError::NoActions);
        }
        let mut state = self.state.lock().unwrap();
        debug!(rule = rule.name(), actions = rule.action_count(), "rule added");
        state.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> Vec<Arc<dyn Rule>> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn add_script(&self, stmt: Statement) {
        self.state.lock().unwrap().script.push(stmt);
    }

    pub fn create_queue(&self, capacity: usize) -> Result<(), RulesetError> {
        let mut state = self.state.lock().unwrap();
        if state.queue.is_some() {
            return Err(RulesetError::RulesQueueExists);
        }
        state.queue = Some(Arc::new(Queue::new(capacity, QueueType::Mpmc)));
        Ok(())
    }

    pub fn queue(&self) -> Option<Arc<Queue<Message>>> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn add_parser(&self, name: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.default_parsers_disabled = true;
        state.parsers.push(name.into());
    }

    pub fn parsers(&self) -> Vec<String> {
        self.state.lock().unwrap().parsers.clone()
    }

    pub fn uses_default_parsers(&self) -> bool {
        !self.state.lock().unwrap().default_parsers_disabled
    }
}

struct RegistryState {
    /// `IndexMap` rather than `HashMap` so that `rulesets()` visits in
    /// insertion order (spec.md §4.6 "visiting order follows insertion
    /// order"), matching `addRuleset`/`loadConf2AddRuleset` appending to an
    /// ordered list in the source.
    by_name: IndexMap<String, Arc<Ruleset>>,
    current: Option<Arc<Ruleset>>,
    default: Option<Arc<Ruleset>>,
}

/// The set of rulesets plus the `current`/`default` pointers (spec.md §3).
///
/// DESIGN NOTES §9 flags the source's global current/default pointers as
/// action-at-a-distance; here the registry is an explicit handle threaded
/// through config-phase calls instead of process-wide mutable statics.
pub struct Registry {
    state: Mutex<RegistryState>,
    main_queue: Arc<Queue<Message>>,
}

impl Registry {
    pub fn new(main_queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                by_name: IndexMap::new(),
                current: None,
                default: None,
            }),
            main_queue: Arc::new(Queue::new(main_queue_capacity, QueueType::Mpmc)),
        }
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    /// Allocates a ruleset that is not yet visible to lookups; callers must
    /// call [`construct_finalize`](Self::construct_finalize) to register it.
    pub fn construct(&self, name: impl Into<String>) -> Arc<Ruleset> {
        Ruleset::new(name.into())
    }

    /// Inserts `rs` into the registry, sets `current := rs`, and sets
    /// `default := rs` if no default exists yet (spec.md §4.5).
    pub fn construct_finalize(&self, rs: Arc<Ruleset>) -> Result<(), RulesetError> {
        let name = rs.name();
        let key = Self::key(&name);
        let mut state = self.state.lock().unwrap();
        if state.by_name.contains_key(&key) {
            return Err(RulesetError::DuplicateName(name));
        }
        state.by_name.insert(key, rs.clone());
        state.current = Some(rs.clone());
        if state.default.is_none() {
            state.default = Some(rs);
        }
        Ok(())
    }

    pub fn get_ruleset(&self, name: &str) -> Option<Arc<Ruleset>> {
        self.state.lock().unwrap().by_name.get(&Self::key(name)).cloned()
    }

    /// Resolves a durable [`RulesetRef`] against this registry. A ruleset
    /// whose weak handle no longer upgrades, or whose name now maps to a
    /// *different* ruleset (replaced by a reload), counts as vanished —
    /// see DESIGN.md's note on the "ruleset-vanished" open question.
    pub fn resolve(&self, rref: &RulesetRef) -> Option<Arc<Ruleset>> {
        let upgraded = rref.upgrade()?;
        let current = self.get_ruleset(rref.name())?;
        if Arc::ptr_eq(&upgraded, &current) { Some(current) } else { None }
    }

    /// Silently no-ops (state unchanged) if `name` is unknown; the error is
    /// returned purely so the caller can log it, per spec.md §4.5.
    pub fn set_default(&self, name: &str) -> Result<(), RulesetError> {
        let rs = self
            .get_ruleset(name)
            .ok_or_else(|| RulesetError::NotFound(name.to_string()))?;
        self.state.lock().unwrap().default = Some(rs);
        Ok(())
    }

    pub fn set_current(&self, name: &str) -> Result<(), RulesetError> {
        let rs = self
            .get_ruleset(name)
            .ok_or_else(|| RulesetError::NotFound(name.to_string()))?;
        self.state.lock().unwrap().current = Some(rs);
        Ok(())
    }

    pub fn get_current(&self) -> Option<Arc<Ruleset>> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn get_default(&self) -> Option<Arc<Ruleset>> {
        self.state.lock().unwrap().default.clone()
    }

    /// Returns the ruleset's own queue, or the registry's main queue if it
    /// has none (spec.md §4.5 `GetRulesetQueue`).
    pub fn ruleset_queue(&self, rs: &Ruleset) -> Arc<Queue<Message>> {
        rs.queue().unwrap_or_else(|| self.main_queue.clone())
    }

    pub fn main_queue(&self) -> Arc<Queue<Message>> {
        self.main_queue.clone()
    }

    /// Snapshot of every ruleset in insertion order (spec.md §4.6 "visiting
    /// order follows insertion order"). Not safe against concurrent
    /// mutation: a ruleset finalized by another thread after this snapshot
    /// is taken simply won't appear in it, same caveat as the source.
    pub fn rulesets(&self) -> Vec<Arc<Ruleset>> {
        self.state.lock().unwrap().by_name.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears and reinitializes the registry (spec.md §4.8). The source does
    /// not reset `pCurr`; we do, since an `Arc` would otherwise keep a
    /// removed ruleset alive while the registry reports it as absent — a
    /// decision recorded in DESIGN.md.
    pub fn destruct_all_actions(&self) {
        let mut state = self.state.lock().unwrap();
        state.by_name.clear();
        state.default = None;
        state.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        reg.construct_finalize(rs.clone()).unwrap();
        assert!(reg.get_ruleset("r1").is_some());
        assert!(reg.get_ruleset("R1").is_some());
        assert!(reg.get_ruleset("R2").is_none());
    }

    #[test]
    fn first_finalized_ruleset_becomes_default() {
        let reg = Registry::new(16);
        let rs1 = reg.construct("R1");
        reg.construct_finalize(rs1.clone()).unwrap();
        let rs2 = reg.construct("R2");
        reg.construct_finalize(rs2).unwrap();
        assert_eq!(reg.get_default().unwrap().name(), "R1");
    }

    #[test]
    fn duplicate_name_is_rejected_and_first_instance_unchanged() {
        let reg = Registry::new(16);
        let rs1 = reg.construct("dup");
        reg.construct_finalize(rs1.clone()).unwrap();
        let rs2 = reg.construct("dup");
        let err = reg.construct_finalize(rs2).unwrap_err();
        assert_eq!(err, RulesetError::DuplicateName("dup".to_string()));
        assert!(Arc::ptr_eq(&reg.get_ruleset("dup").unwrap(), &rs1));
    }

    #[test]
    fn set_current_unknown_name_preserves_previous_current() {
        let reg = Registry::new(16);
        let rs1 = reg.construct("R1");
        reg.construct_finalize(rs1.clone()).unwrap();
        assert!(reg.set_current("does-not-exist").is_err());
        assert_eq!(reg.get_current().unwrap().name(), "R1");
    }

    #[test]
    fn zero_action_rule_is_rejected() {
        struct NoAction;
        impl Rule for NoAction {
            fn process_batch(&self, _: &mut crate::batch::Batch) {}
            fn iterate_all_actions(&self, _: &mut dyn FnMut(&dyn crate::rule::Action)) {}
            fn action_count(&self) -> usize {
                0
            }
        }
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        assert_eq!(rs.add_rule(Arc::new(NoAction)), Err(RulesetError::NoActions));
        let _ = reg.construct_finalize(rs);
    }

    #[test]
    fn adding_first_parser_disables_default_parser_set() {
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        assert!(rs.uses_default_parsers());
        rs.add_parser("json");
        assert!(!rs.uses_default_parsers());
        let _ = reg.construct_finalize(rs);
    }

    #[test]
    fn duplicate_queue_attach_is_rejected() {
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        rs.create_queue(8).unwrap();
        assert_eq!(rs.create_queue(8), Err(RulesetError::RulesQueueExists));
        let _ = reg.construct_finalize(rs);
    }

    #[test]
    fn destruct_all_actions_empties_registry_and_clears_default() {
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        reg.construct_finalize(rs).unwrap();
        assert_eq!(reg.len(), 1);
        reg.destruct_all_actions();
        assert!(reg.is_empty());
        assert!(reg.get_default().is_none());
    }

    #[test]
    fn rulesets_are_visited_in_construction_order() {
        let reg = Registry::new(16);
        let names = ["zebra", "apple", "mango", "banana"];
        for name in names {
            let rs = reg.construct(name);
            reg.construct_finalize(rs).unwrap();
        }
        let visited: Vec<String> = reg.rulesets().iter().map(|rs| rs.name()).collect();
        assert_eq!(visited, names);
    }

    #[test]
    fn ruleset_without_queue_falls_back_to_main_queue() {
        let reg = Registry::new(16);
        let rs = reg.construct("R1");
        let q = reg.ruleset_queue(&rs);
        assert!(Arc::ptr_eq(&q, &reg.main_queue()));
    }
}
