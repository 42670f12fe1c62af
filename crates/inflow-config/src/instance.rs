use inflow_ruleset::RulesetRef;

/// A declared `inputTCPServerRun` listener, captured with whatever the
/// legacy option block held at the moment it was declared (spec.md §4.7
/// `addInstance`).
#[derive(Clone)]
pub struct InstanceConf {
    pub port: u16,
    pub ruleset_name: Option<String>,
    pub input_name: String,
    pub octet_framing_supported: bool,
    /// Filled in by [`crate::loader::ConfigLoader::check_config`].
    pub resolved_ruleset: Option<RulesetRef>,
}

/// `inputTCPServerRun`'s port default (imtcp.c `addInstance`: empty port
/// string becomes `"10514"`).
pub const DEFAULT_PORT: u16 = 10514;
