//! Environment-derived configuration, with CLI flags as overrides.
//!
//! Environment variables are primary (spec §6); the `clap`-derived CLI is
//! sugar layered on top, mirroring the teacher's `Cli` struct.

use std::env;
use std::net::IpAddr;

use clap::Parser;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_WEBSOCKET_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug)]
#[command(version, about = "Reverse-tunnel HTTP gateway")]
struct Cli {
    /// Bind address for both the HTTP and controller-socket endpoints.
    #[arg(long)]
    host: Option<IpAddr>,

    /// HTTP listen port.
    #[arg(long)]
    http_port: Option<u16>,

    /// Controller-endpoint listen port.
    #[arg(long)]
    websocket_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub websocket_port: u16,
    pub log_level: String,
    pub auth_plugin: String,
    pub device_keys: Vec<String>,
    pub mysql_connection_url: Option<String>,
    pub mysql_table: Option<String>,
}

impl Config {
    /// Reads `DEVICE_KEYS`/`AUTHENTICATION_PLUGIN`/etc. from the environment,
    /// then applies any CLI overrides for host/ports.
    pub fn load() -> Self {
        let cli = Cli::parse();

        let host = cli
            .host
            .map(|ip| ip.to_string())
            .or_else(|| env::var("HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let http_port = cli
            .http_port
            .or_else(|| env::var("HTTP_PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_HTTP_PORT);

        let websocket_port = cli
            .websocket_port
            .or_else(|| {
                env::var("WEBSOCKET_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_WEBSOCKET_PORT);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        let auth_plugin = env::var("AUTHENTICATION_PLUGIN").unwrap_or_else(|_| "allow_all".to_string());

        let device_keys = env::var("DEVICE_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            http_port,
            websocket_port,
            log_level,
            auth_plugin,
            device_keys,
            mysql_connection_url: env::var("MYSQL_CONNECTION_URL").ok(),
            mysql_table: env::var("MYSQL_TABLE").ok(),
        }
    }

    /// `tracing_subscriber::EnvFilter` directive for `LOG_LEVEL`. `fatal` and
    /// `silent` aren't native tracing levels; map them onto the closest
    /// supported behavior.
    pub fn filter_directive(&self) -> String {
        match self.log_level.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" => "warn".to_string(),
            "error" | "fatal" => "error".to_string(),
            "silent" => "off".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            host: DEFAULT_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            websocket_port: DEFAULT_WEBSOCKET_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auth_plugin: "allow_all".to_string(),
            device_keys: vec![],
            mysql_connection_url: None,
            mysql_table: None,
        }
    }

    #[test]
    fn fatal_and_silent_map_onto_tracing_levels() {
        let mut config = base_config();
        config.log_level = "fatal".to_string();
        assert_eq!(config.filter_directive(), "error");
        config.log_level = "silent".to_string();
        assert_eq!(config.filter_directive(), "off");
    }

    #[test]
    fn device_keys_split_and_trim() {
        let keys: Vec<String> = " a , b ,, c"
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
