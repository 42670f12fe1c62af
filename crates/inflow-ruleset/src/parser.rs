use std::{collections::HashMap, sync::Mutex};

use crate::error::RulesetError;

/// A named parser slot. Parsing itself is an external collaborator (spec.md
/// §1 lists message parsing as out of scope); this registry exists so that
/// `rulesetParser`/`addParser` and the `PARSER_NOT_FOUND` error path are
/// exercised the same way a directive table would exercise them, without
/// inventing a parsing engine this spec does not call for.
#[derive(Clone, Copy, Debug)]
pub struct Parser {
    name: &'static str,
}

impl Parser {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct ParserRegistry {
    by_name: Mutex<HashMap<&'static str, Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self { by_name: Mutex::new(HashMap::new()) }
    }

    /// Registers a parser under `name`. Idempotent: registering the same
    /// name twice just replaces the slot, matching the source's tolerance
    /// for modules re-registering their own parser on config reload.
    pub fn register(&self, name: &'static str) {
        self.by_name.lock().unwrap().insert(name, Parser { name });
    }

    pub fn get(&self, name: &str) -> Result<Parser, RulesetError> {
        self.by_name
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| RulesetError::ParserNotFound(name.to_string()))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parser_name_is_reported() {
        let reg = ParserRegistry::new();
        assert_eq!(reg.get("json"), Err(RulesetError::ParserNotFound("json".to_string())));
    }

    #[test]
    fn registered_parser_is_found_by_name() {
        let reg = ParserRegistry::new();
        reg.register("json");
        assert_eq!(reg.get("json").unwrap().name(), "json");
    }
}
