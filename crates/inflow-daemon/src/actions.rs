use inflow_ruleset::{Action, ActionError};
use tracing::info;

/// Minimal built-in action used by the default ruleset when nothing more
/// specific is configured: logs the message at info level. A full action
/// runtime (file/forward/omusrmsg-equivalents) is out of scope (spec.md §1).
pub struct LogAction {
    name: String,
}

impl LogAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Action for LogAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, message: &[u8]) -> Result<(), ActionError> {
        info!(payload = %String::from_utf8_lossy(message), "message");
        Ok(())
    }
}
