use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Rentals marketplace real-time server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "rentals-server", version, about = "Rentals real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RENTALS_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RENTALS_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./rentals.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RENTALS_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "RENTALS_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds allowed for WebSocket handshake authentication
    #[arg(long, env = "RENTALS_AUTH_TIMEOUT_SECS", default_value = "5")]
    pub auth_timeout_secs: u64,

    /// Group bus configuration (loaded from [bus] section in TOML)
    #[arg(skip)]
    #[serde(default = "default_bus_config")]
    pub bus: Option<BusConfig>,

    /// Push delivery configuration (loaded from [push] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub push: Option<PushConfig>,
}

/// Which fabric carries group events between connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// Single-process fan-out through the local connection registry
    Memory,
    /// Cross-process fan-out through Redis PUBLISH / PSUBSCRIBE
    Redis,
}

/// Configuration for the group bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_backend")]
    pub backend: BusBackend,

    /// Redis connection URL, only read when backend = "redis"
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for Redis channel names (`<prefix>:user_<id>`)
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            redis_url: default_redis_url(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

fn default_bus_config() -> Option<BusConfig> {
    Some(BusConfig::default())
}

fn default_bus_backend() -> BusBackend {
    BusBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_channel_prefix() -> String {
    "rentals".to_string()
}

/// Configuration for mobile push delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether push delivery is attempted at all (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Push service send endpoint
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    /// Server key sent as `Authorization: key=<server_key>`
    #[serde(default)]
    pub server_key: String,

    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_push_endpoint(),
            server_key: String::new(),
            timeout_secs: default_push_timeout(),
        }
    }
}

fn default_push_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

fn default_push_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./rentals.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            auth_timeout_secs: 5,
            bus: Some(BusConfig::default()),
            push: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RENTALS_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RENTALS_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Rentals Real-Time Server Configuration
# Place this file at ./rentals.toml or specify with --config <path>
# All settings can be overridden via environment variables (RENTALS_PORT,
# RENTALS_BUS__BACKEND, etc.) or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Seconds a WebSocket handshake may spend authenticating before it is rejected
# auth_timeout_secs = 5

# ---- Group Bus ----
# [bus]

# "memory" for a single process, "redis" to fan out across processes
# backend = "memory"
# redis_url = "redis://127.0.0.1:6379"
# channel_prefix = "rentals"

# ---- Push Delivery ----
# [push]
# enabled = false
# endpoint = "https://fcm.googleapis.com/fcm/send"
# server_key = ""
# timeout_secs = 10
"#
    .to_string()
}
