use inflow_net::{DriverMode, FramingPolicy, PermittedPeerList, ServerParams};

use crate::legacy::LegacyOptions;

/// The module-wide config snapshot taken at `loadEnd` (spec.md §4.7
/// `endCnfLoad`): "snapshot the current global options into the
/// module-config struct, transferring ownership of any auth-mode string".
pub struct ModuleConfig {
    pub server_params: ServerParams,
    pub driver_mode: DriverMode,
    pub driver_auth_mode: Option<String>,
    pub permitted_peers: PermittedPeerList,
    pub addtl_frame_delimiter: Option<u8>,
    pub disable_lf_delimiter: bool,
}

impl ModuleConfig {
    pub fn from_legacy(cs: &LegacyOptions) -> Self {
        Self {
            server_params: ServerParams {
                sess_max: cs.sess_max.max(0) as usize,
                lstn_max: cs.lstn_max.max(0) as usize,
                keep_alive: cs.keep_alive,
                notify_on_close: cs.notify_on_close,
                use_flow_control: cs.use_flow_control,
            },
            driver_mode: cs.driver_mode(),
            driver_auth_mode: cs.driver_auth_mode.clone(),
            permitted_peers: cs.permitted_peer_list(),
            addtl_frame_delimiter: cs.addtl_frame_delimiter.map(|v| v as u8),
            disable_lf_delimiter: cs.disable_lf_delimiter,
        }
    }

    pub fn framing_policy(&self, octet_framing_supported: bool) -> FramingPolicy {
        FramingPolicy {
            octet_framing_supported,
            addtl_frame_delimiter: self.addtl_frame_delimiter,
            disable_lf_delimiter: self.disable_lf_delimiter,
            ..Default::default()
        }
    }
}
