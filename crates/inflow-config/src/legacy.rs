use inflow_net::{DriverMode, FramingPolicy, PermittedPeerList};

use crate::error::ConfigError;

/// The legacy option block (`cs` in the original), mutated directive by
/// directive during a config load and consumed into an immutable
/// [`crate::module::ModuleConfig`] at `loadEnd` (spec.md §9 "Legacy option
/// block `cs`": "model as a per-load builder that is consumed into the
/// immutable module-config at load end").
#[derive(Clone)]
pub struct LegacyOptions {
    pub sess_max: i32,
    pub lstn_max: i32,
    pub keep_alive: bool,
    pub support_octet_framing: bool,
    pub notify_on_close: bool,
    pub driver_mode: i32,
    pub driver_auth_mode: Option<String>,
    pub permitted_peers: Vec<String>,
    pub addtl_frame_delimiter: Option<i32>,
    pub disable_lf_delimiter: bool,
    pub input_name: String,
    pub bind_ruleset: Option<String>,
    pub use_flow_control: bool,
}

/// `TCPSRV_NO_ADDTL_DELIMITER` (imtcp.c): no additional delimiter byte.
pub const NO_ADDTL_DELIMITER: i32 = -1;

impl Default for LegacyOptions {
    /// `resetConfigVariables` (spec.md §6 table; imtcp.c `resetConfigVariables`).
    fn default() -> Self {
        Self {
            sess_max: 200,
            lstn_max: 20,
            keep_alive: false,
            support_octet_framing: true,
            notify_on_close: false,
            driver_mode: 0,
            driver_auth_mode: None,
            permitted_peers: Vec::new(),
            addtl_frame_delimiter: None,
            disable_lf_delimiter: false,
            input_name: "imtcp".to_string(),
            bind_ruleset: None,
            use_flow_control: false,
        }
    }
}

impl LegacyOptions {
    pub fn driver_mode(&self) -> DriverMode {
        DriverMode::from_legacy_int(self.driver_mode)
    }

    pub fn permitted_peer_list(&self) -> PermittedPeerList {
        let mut list = PermittedPeerList::new();
        for peer in &self.permitted_peers {
            list.add(peer.clone());
        }
        list
    }

    pub fn framing_policy(&self, octet_framing_supported: bool) -> FramingPolicy {
        FramingPolicy {
            octet_framing_supported,
            addtl_frame_delimiter: self.addtl_frame_delimiter.map(|v| v as u8),
            disable_lf_delimiter: self.disable_lf_delimiter,
            ..Default::default()
        }
    }
}

pub(crate) fn parse_bool(directive: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue { directive: directive.to_string(), value: value.to_string() }),
    }
}

pub(crate) fn parse_int(directive: &str, value: &str) -> Result<i32, ConfigError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| ConfigError::InvalidValue { directive: directive.to_string(), value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resetconfigvariables_matches_documented_defaults() {
        let cs = LegacyOptions::default();
        assert_eq!(cs.sess_max, 200);
        assert_eq!(cs.lstn_max, 20);
        assert!(!cs.keep_alive);
        assert!(cs.support_octet_framing);
        assert!(!cs.notify_on_close);
        assert_eq!(cs.driver_mode, 0);
        assert!(!cs.disable_lf_delimiter);
        assert_eq!(cs.input_name, "imtcp");
        assert!(!cs.use_flow_control);
    }
}
