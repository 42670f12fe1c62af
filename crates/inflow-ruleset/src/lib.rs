mod batch;
mod dispatch;
mod error;
mod iterate;
mod message;
mod parser;
mod registry;
mod rule;

pub use batch::{Batch, BatchElem, BatchState};
pub use dispatch::process_batch;
pub use error::{DispatchError, RulesetError};
pub use iterate::{iterate_all_actions, iterate_ruleset_all_actions};
pub use message::{Message, RulesetRef};
pub use parser::{Parser, ParserRegistry};
pub use registry::{Registry, Ruleset, Statement};
pub use rule::{Action, ActionError, FilterRule, Rule};
