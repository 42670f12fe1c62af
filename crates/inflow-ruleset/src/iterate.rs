use tracing::debug;

use crate::{registry::Registry, rule::Action};

/// Visits every action of every rule of every ruleset currently registered
/// (spec.md §4.8 `iterateAllActions`). Used for both HUP-notify and
/// shutdown-teardown sweeps.
///
/// Matches the source's caveat: this walks a snapshot of the registry and is
/// not safe against concurrent `construct_finalize`/`destruct_all_actions`
/// calls racing it. Callers are expected to serialize config-phase mutation
/// against iteration, the same contract the original places on its caller.
pub fn iterate_all_actions(registry: &Registry, mut f: impl FnMut(&dyn Action)) {
    for ruleset in registry.rulesets() {
        debug!(ruleset = %ruleset.name(), "iterating ruleset actions");
        for rule in ruleset.rules() {
            rule.iterate_all_actions(&mut f);
        }
    }
}

/// Narrower variant scoped to a single named ruleset (spec.md §4.8
/// `iterateRulesetAllActions`), used when a directive names one ruleset
/// explicitly rather than sweeping the whole registry.
pub fn iterate_ruleset_all_actions(registry: &Registry, name: &str, mut f: impl FnMut(&dyn Action)) {
    let Some(ruleset) = registry.get_ruleset(name) else {
        return;
    };
    for rule in ruleset.rules() {
        rule.iterate_all_actions(&mut f);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::rule::{ActionError, FilterRule};

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
    fn iterate_all_actions_visits_every_ruleset() {
        let registry = Registry::new(16);
        let counter = Arc::new(AtomicUsize::new(0));

        let rs1 = registry.construct("r1");
        rs1.add_rule(Arc::new(FilterRule::catch_all(
            "rule1",
            vec![Box::new(CountingAction(counter.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs1).unwrap();

        let rs2 = registry.construct("r2");
        rs2.add_rule(Arc::new(FilterRule::catch_all(
            "rule2",
            vec![Box::new(CountingAction(counter.clone())), Box::new(CountingAction(counter.clone()))],
        )))
        .unwrap();
        registry.construct_finalize(rs2).unwrap();

        let mut visited = 0;
        iterate_all_actions(&registry, |_action| visited += 1);
        assert_eq!(visited, 3);
    }

    #[test]
    fn iterate_all_actions_visits_rulesets_in_construction_order() {
        let registry = Registry::new(16);
        for name in ["third", "first", "second"] {
            let rs = registry.construct(name);
            rs.add_rule(Arc::new(FilterRule::catch_all(name, vec![Box::new(CountingAction(Arc::new(AtomicUsize::new(0))))])))
                .unwrap();
            registry.construct_finalize(rs).unwrap();
        }

        let mut order = Vec::new();
        for ruleset in registry.rulesets() {
            order.push(ruleset.name());
        }
        assert_eq!(order, vec!["third", "first", "second"]);
    }

    #[test]
    fn iterate_ruleset_all_actions_ignores_unknown_name() {
        let registry = Registry::new(16);
        let mut visited = 0;
        iterate_ruleset_all_actions(&registry, "missing", |_| visited += 1);
        assert_eq!(visited, 0);
    }
}
