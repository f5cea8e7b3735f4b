use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags the operator actually passed are
/// serialized, so they override the file and environment layers without
/// clobbering them with defaults.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "dealroom-server", version, about = "Dealroom transaction chat server")]
pub struct Cli {
    /// Port to listen on [default: 1990]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./dealroom.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (SQLite database) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// TOML file the configuration was read from
    #[serde(default)]
    pub config: String,
    pub json_logs: bool,
    /// Set by `--generate-config`; never read from file or env
    #[serde(skip)]
    pub generate_config: bool,
    pub data_dir: String,
    /// Chat tuning (loaded from [chat] section in TOML)
    #[serde(default)]
    pub chat: ChatSettings,
}

/// Limits and housekeeping intervals for the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// History page size when a getMessages frame carries no limit (default: 50)
    #[serde(default = "default_history_limit")]
    pub history_default_limit: u32,

    /// Upper bound for a requested history page (default: 100)
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: u32,

    /// Maximum message length in characters (default: 4000)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Lifetime of a registry row before the reaper may remove it (default: 86400 = 24h)
    #[serde(default = "default_connection_ttl")]
    pub connection_ttl_secs: u64,

    /// Interval in seconds between expired-connection sweeps (default: 3600)
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Refuse sockets that claim the `system` role (default: false, every role is accepted)
    #[serde(default)]
    pub deny_system_role: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max_limit(),
            max_content_length: default_max_content_length(),
            connection_ttl_secs: default_connection_ttl(),
            reap_interval_secs: default_reap_interval(),
            deny_system_role: false,
        }
    }
}

fn default_history_limit() -> u32 {
    50
}

fn default_history_max_limit() -> u32 {
    100
}

fn default_max_content_length() -> usize {
    4000
}

fn default_connection_ttl() -> u64 {
    86400
}

fn default_reap_interval() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1990,
            bind_address: "0.0.0.0".to_string(),
            config: "./dealroom.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            chat: ChatSettings::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DEALROOM_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let mut config: Config = Self::figment(&cli.config)
            .merge(Serialized::defaults(&cli))
            .extract()?;
        config.config = cli.config;
        config.generate_config = cli.generate_config;
        Ok(config)
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DEALROOM_").split("__"))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Dealroom Chat Server Configuration
# Place this file at ./dealroom.toml or specify with --config <path>
# All settings can be overridden via environment variables (DEALROOM_PORT, etc.)
# or CLI flags (--port, etc.). Nested keys use a double underscore:
# DEALROOM_CHAT__MAX_CONTENT_LENGTH=2000

# Server port (default: 1990)
# port = 1990

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Transaction Chat ----
# [chat]

# History page size when the client sends no limit (default: 50)
# history_default_limit = 50

# Largest history page a client may request (default: 100)
# history_max_limit = 100

# Maximum message length in characters (default: 4000)
# max_content_length = 4000

# Registry rows older than this are treated as dead sockets (default: 86400 = 24 hours)
# connection_ttl_secs = 86400

# Interval between expired-connection sweeps (default: 3600 = 1 hour)
# reap_interval_secs = 3600

# Refuse sockets that connect with the "system" role (default: false)
# deny_system_role = false
"#
    .to_string()
}
