use thiserror::Error;

/// Operator-facing error codes, matching the ones spec.md §6 lists as
/// surfaced to the operator (`NO_CURR_RULESET`, `RULES_QUEUE_EXISTS`,
/// `PARSER_NOT_FOUND`) plus the registry-internal ones needed to make
/// `constructFinalize`/`setCurrent`/`setDefault` testable in isolation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesetError {
    #[error("ruleset '{0}' already exists")]
    DuplicateName(String),
    #[error("ruleset '{0}' not found")]
    NotFound(String),
    #[error("no current ruleset is in scope for this directive")]
    NoCurrRuleset,
    #[error("ruleset already has a main queue, can not add another one")]
    RulesQueueExists,
    #[error("parser '{0}' not found")]
    ParserNotFound(String),
    #[error("rule has no actions and was discarded")]
    NoActions,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("failed to allocate a partition batch")]
    AllocFail,
}
