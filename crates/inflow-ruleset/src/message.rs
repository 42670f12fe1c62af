use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};

use crate::registry::Ruleset;

/// A durable handle to a ruleset, carried by messages that outlive a single
/// config generation (e.g. sitting in a queue across a HUP).
///
/// Resolution re-checks both liveness (`Weak::upgrade`) and registry
/// membership by name, so a ruleset replaced by a same-named reload is
/// treated as vanished rather than silently kept alive by the `Arc` — see
/// DESIGN.md's note on the "ruleset-vanished" open question.
#[derive(Clone)]
pub struct RulesetRef {
    name: String,
    handle: Weak<Ruleset>,
}

impl RulesetRef {
    pub fn new(rs: &Arc<Ruleset>) -> Self {
        Self { name: rs.name(), handle: Arc::downgrade(rs) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<Ruleset>> {
        self.handle.upgrade()
    }
}

/// One ingested syslog record, carrying the minimum spec.md §3 requires:
/// payload bytes, source-peer identity, and an optional ruleset reference.
#[derive(Clone)]
pub struct Message {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
    pub input_name: String,
    pub ruleset: Option<RulesetRef>,
    /// Flow-control signal: true when `inputTCPFlowControl` marked this
    /// message (and the session it came from) as delayable under backpressure.
    pub light_delayable: bool,
}

impl Message {
    pub fn new(payload: Vec<u8>, peer: SocketAddr, input_name: impl Into<String>) -> Self {
        Self { payload, peer, input_name: input_name.into(), ruleset: None, light_delayable: false }
    }

    pub fn with_ruleset(mut self, ruleset: Option<RulesetRef>) -> Self {
        self.ruleset = ruleset;
        self
    }

    pub fn with_light_delayable(mut self, light_delayable: bool) -> Self {
        self.light_delayable = light_delayable;
        self
    }
}
