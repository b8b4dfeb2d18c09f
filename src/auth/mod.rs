//! C1 — the authentication-plugin contract (spec §4.1).
//!
//! A plugin is initialized once at startup and then answers `validate_key`
//! on demand, concurrently, for the lifetime of the process. Plugin
//! selection is by name (`AUTHENTICATION_PLUGIN`); unknown names are fatal.

mod allow_all;
mod env_list;
mod mysql;

use crate::config::Config;
use crate::error::GatewayError;

/// Capability a controller-admission check is gated behind.
pub trait AuthPlugin: Send + Sync {
    /// Validates a device key. `Err` and `Ok(false)` both refuse admission;
    /// the core logs `Err` specifically and otherwise treats the two the
    /// same (spec §4.1).
    async fn validate_key(&self, device_key: &str) -> anyhow::Result<bool>;
}

/// The active plugin, resolved once at startup by name.
pub enum Plugin {
    EnvList(env_list::EnvListPlugin),
    Mysql(mysql::MysqlPlugin),
    AllowAll(allow_all::AllowAllPlugin),
}

impl Plugin {
    pub async fn validate_key(&self, device_key: &str) -> anyhow::Result<bool> {
        match self {
            Plugin::EnvList(p) => p.validate_key(device_key).await,
            Plugin::Mysql(p) => p.validate_key(device_key).await,
            Plugin::AllowAll(p) => p.validate_key(device_key).await,
        }
    }
}

/// Resolves `AUTHENTICATION_PLUGIN` to a concrete backend and initializes it.
/// Any failure here is fatal to process startup (spec §4.1/§6).
pub async fn init(config: &Config) -> Result<Plugin, GatewayError> {
    match config.auth_plugin.as_str() {
        "env_list" => {
            let plugin = env_list::EnvListPlugin::init(&config.device_keys)
                .map_err(GatewayError::PluginInit)?;
            Ok(Plugin::EnvList(plugin))
        }
        "mysql" => {
            let plugin = mysql::MysqlPlugin::init(
                config.mysql_connection_url.as_deref(),
                config.mysql_table.as_deref(),
            )
            .await
            .map_err(GatewayError::PluginInit)?;
            Ok(Plugin::Mysql(plugin))
        }
        "allow_all" => Ok(Plugin::AllowAll(allow_all::AllowAllPlugin::init())),
        other => Err(GatewayError::UnknownPlugin(other.to_string())),
    }
}
