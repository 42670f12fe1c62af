use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use inflow_net::{DriverMode, ListenerSpec, PlainDriver, ServerHandle, StreamDriver, TcpServer};
use inflow_ruleset::{ParserRegistry, Registry, RulesetRef};
use tracing::warn;

use crate::{
    error::ConfigError,
    instance::{DEFAULT_PORT, InstanceConf},
    legacy::{LegacyOptions, parse_bool, parse_int},
    module::ModuleConfig,
};

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let directive = parts.next()?;
    let value = parts.next().unwrap_or("").trim();
    Some((directive, value))
}

/// Drives the directive table through the phases `imtcp.c` documents:
/// `loadBegin` / `addInstance` (via `process_line`) / `loadEnd` /
/// `checkConfig` / `activatePrePrivDrop` / `freeConfig` (spec.md §4.7).
pub struct ConfigLoader {
    cs: LegacyOptions,
    instances: Vec<InstanceConf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { cs: LegacyOptions::default(), instances: Vec::new() }
    }

    /// `beginCnfLoad` (imtcp.c): reset the legacy option block.
    pub fn begin_load(&mut self) {
        self.cs = LegacyOptions::default();
    }

    pub fn instances(&self) -> &[InstanceConf] {
        &self.instances
    }

    /// Parses and applies one line of the directive table. Blank lines and
    /// `#`-prefixed comments are ignored.
    pub fn process_line(
        &mut self,
        line: &str,
        registry: &Registry,
        parsers: &ParserRegistry,
    ) -> Result<(), ConfigError> {
        let Some((directive, value)) = parse_line(line) else {
            return Ok(());
        };
        match directive {
            "inputTCPServerRun" => self.add_instance(value),
            "inputTCPMaxSessions" => {
                self.cs.sess_max = parse_int(directive, value)?;
                Ok(())
            }
            "inputTCPMaxListeners" => {
                self.cs.lstn_max = parse_int(directive, value)?;
                Ok(())
            }
            "inputTCPServerKeepAlive" => {
                self.cs.keep_alive = parse_bool(directive, value)?;
                Ok(())
            }
            "inputTCPSupportOctetCountedFraming" => {
                self.cs.support_octet_framing = parse_bool(directive, value)?;
                Ok(())
            }
            "inputTCPServerNotifyOnConnectionClose" => {
                self.cs.notify_on_close = parse_bool(directive, value)?;
                Ok(())
            }
            "inputTCPServerStreamDriverMode" => {
                self.cs.driver_mode = parse_int(directive, value)?;
                Ok(())
            }
            "inputTCPServerStreamDriverAuthMode" => {
                self.cs.driver_auth_mode = Some(value.to_string());
                Ok(())
            }
            "inputTCPServerStreamDriverPermittedPeer" => {
                self.cs.permitted_peers.push(value.to_string());
                Ok(())
            }
            "inputTCPServerAddtlFrameDelimiter" => {
                self.cs.addtl_frame_delimiter = Some(parse_int(directive, value)?);
                Ok(())
            }
            "inputTCPServerDisableLFDelimiter" => {
                self.cs.disable_lf_delimiter = parse_bool(directive, value)?;
                Ok(())
            }
            "inputTCPServerInputName" => {
                self.cs.input_name = value.to_string();
                Ok(())
            }
            "inputTCPServerBindRuleset" => {
                self.cs.bind_ruleset = Some(value.to_string());
                Ok(())
            }
            "inputTCPFlowControl" => {
                self.cs.use_flow_control = parse_bool(directive, value)?;
                Ok(())
            }
            "rulesetParser" => self.ruleset_parser(value, registry, parsers),
            "rulesetCreateMainQueue" => self.ruleset_create_main_queue(value, registry),
            "resetConfigVariables" => {
                self.cs = LegacyOptions::default();
                Ok(())
            }
            other => Err(ConfigError::UnknownDirective(other.to_string())),
        }
    }

    fn add_instance(&mut self, value: &str) -> Result<(), ConfigError> {
        let port = if value.is_empty() {
            DEFAULT_PORT
        } else {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { directive: "inputTCPServerRun".into(), value: value.into() })?
        };
        self.instances.push(InstanceConf {
            port,
            ruleset_name: self.cs.bind_ruleset.clone(),
            input_name: self.cs.input_name.clone(),
            octet_framing_supported: self.cs.support_octet_framing,
            resolved_ruleset: None,
        });
        Ok(())
    }

    /// `rulesetParser foo`: adds `foo` to the current ruleset's parser list
    /// (spec.md §6, SPEC_FULL supplement #5). `NO_CURR_RULESET` if no
    /// ruleset is in scope, `PARSER_NOT_FOUND` if `foo` is unregistered.
    fn ruleset_parser(&self, name: &str, registry: &Registry, parsers: &ParserRegistry) -> Result<(), ConfigError> {
        parsers.get(name).map_err(ConfigError::from)?;
        let rs = registry.get_current().ok_or(ConfigError::NoCurrRuleset)?;
        rs.add_parser(name);
        Ok(())
    }

    /// `rulesetCreateMainQueue on`: attaches a private queue to the current
    /// ruleset. `RULES_QUEUE_EXISTS` on a duplicate attach.
    fn ruleset_create_main_queue(&self, value: &str, registry: &Registry) -> Result<(), ConfigError> {
        if !parse_bool("rulesetCreateMainQueue", value)? {
            return Ok(());
        }
        let rs = registry.get_current().ok_or(ConfigError::NoCurrRuleset)?;
        rs.create_queue(1024).map_err(ConfigError::from)
    }

    /// `endCnfLoad` (imtcp.c): snapshot the legacy block into an immutable
    /// module config.
    pub fn end_load(&self) -> ModuleConfig {
        ModuleConfig::from_legacy(&self.cs)
    }

    /// `checkConfig` (spec.md §4.7): resolve every instance's ruleset name;
    /// an unresolved name falls back to the registry default with a
    /// warning rather than aborting. `NO_LISTENERS` if no instance was
    /// declared at all.
    pub fn check_config(&mut self, registry: &Registry) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::NoListeners);
        }
        for inst in &mut self.instances {
            inst.resolved_ruleset = match &inst.ruleset_name {
                Some(name) => match registry.get_ruleset(name) {
                    Some(rs) => Some(RulesetRef::new(&rs)),
                    None => {
                        warn!(ruleset = %name, "bound ruleset not found, falling back to default");
                        registry.get_default().map(|rs| RulesetRef::new(&rs))
                    }
                },
                None => registry.get_default().map(|rs| RulesetRef::new(&rs)),
            };
        }
        Ok(())
    }

    /// `activatePrePrivDrop` (spec.md §4.7): build the single shared
    /// `TcpServer`, configure every declared listener, and hand back a
    /// running server handle. `NO_RUN` if, somehow, activation produced
    /// nothing (the original's `pOurTcpsrv` still `NULL` case).
    pub fn activate_pre_priv_drop(
        &self,
        module_config: ModuleConfig,
        registry: Arc<Registry>,
    ) -> Result<ServerHandle, ConfigError> {
        if module_config.driver_mode == DriverMode::Tls {
            return Err(ConfigError::InvalidValue {
                directive: "inputTCPServerStreamDriverMode".into(),
                value: "tls (no certificate-provisioning directive is defined by this config surface)".into(),
            });
        }
        let driver: Arc<dyn StreamDriver> = Arc::new(PlainDriver::new(module_config.permitted_peers.clone()));
        let mut server = TcpServer::construct(driver, module_config.server_params.clone(), registry)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        for inst in &self.instances {
            server
                .configure_listen(ListenerSpec {
                    bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    port: inst.port,
                    ruleset: inst.resolved_ruleset.clone(),
                    input_name: inst.input_name.clone(),
                    framing_policy: module_config.framing_policy(inst.octet_framing_supported),
                })
                .map_err(|e| ConfigError::InvalidValue {
                    directive: "inputTCPMaxListeners".into(),
                    value: e.to_string(),
                })?;
        }
        server.construct_finalize().map_err(|_| ConfigError::NoRun)?;
        Ok(server.run())
    }
}
