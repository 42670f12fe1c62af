use thiserror::Error;

/// Operator-facing error codes (spec.md §6, §7 "Config"). Config errors
/// abort the activation phase and leave prior state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown directive '{0}'")]
    UnknownDirective(String),
    #[error("invalid value '{value}' for directive '{directive}'")]
    InvalidValue { directive: String, value: String },
    #[error("no current ruleset is in scope for this directive")]
    NoCurrRuleset,
    #[error("ruleset already has a main queue, can not add another one")]
    RulesQueueExists,
    #[error("parser '{0}' not found")]
    ParserNotFound(String),
    #[error("module loaded but no inputTCPServerRun directive was given")]
    NoListeners,
    #[error("activation produced no running server")]
    NoRun,
    #[error("io error: {0}")]
    Io(String),
}

impl From<inflow_ruleset::RulesetError> for ConfigError {
    fn from(err: inflow_ruleset::RulesetError) -> Self {
        match err {
            inflow_ruleset::RulesetError::NoCurrRuleset => Self::NoCurrRuleset,
            inflow_ruleset::RulesetError::RulesQueueExists => Self::RulesQueueExists,
            inflow_ruleset::RulesetError::ParserNotFound(name) => Self::ParserNotFound(name),
            other => Self::InvalidValue { directive: "ruleset".to_string(), value: other.to_string() },
        }
    }
}
