mod error;
mod instance;
mod legacy;
mod loader;
mod module;

pub use error::ConfigError;
pub use instance::{DEFAULT_PORT, InstanceConf};
pub use legacy::{LegacyOptions, NO_ADDTL_DELIMITER};
pub use loader::ConfigLoader;
pub use module::ModuleConfig;
