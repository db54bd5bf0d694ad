use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Public address players use to reach stream URLs
    pub base_url: Option<String>,
}

/// Session limits and timers. All durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: u64,
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: u64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
    #[serde(default = "default_stream_ready_wait")]
    pub stream_ready_wait: u64,
    /// Longest wait for the engine's first byte of a stream
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Simulated,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_kind")]
    pub kind: EngineKind,
    /// Base URL of the transfer daemon, required for `remote`
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default)]
    pub simulated: SimulatedEngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedEngineConfig {
    #[serde(default = "default_metadata_delay_ms")]
    pub metadata_delay_ms: u64,
    #[serde(default = "default_ready_delay_ms")]
    pub ready_delay_ms: u64,
    #[serde(default = "default_file_size")]
    pub default_file_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret; auth is disabled when absent
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

// Default value functions
fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_max_sessions() -> usize {
    10
}

fn default_metadata_timeout() -> u64 {
    300 // 5 minutes
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_idle_threshold() -> u64 {
    600 // 10 minutes
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_stream_ready_wait() -> u64 {
    2
}

fn default_first_byte_timeout() -> u64 {
    30
}

fn default_engine_kind() -> EngineKind {
    EngineKind::Simulated
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1
}

fn default_metadata_delay_ms() -> u64 {
    500
}

fn default_ready_delay_ms() -> u64 {
    1500
}

fn default_file_size() -> u64 {
    256 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            metadata_timeout: default_metadata_timeout(),
            ready_timeout: default_ready_timeout(),
            idle_threshold: default_idle_threshold(),
            reaper_interval: default_reaper_interval(),
            stream_ready_wait: default_stream_ready_wait(),
            first_byte_timeout: default_first_byte_timeout(),
        }
    }
}

impl SessionsConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval)
    }

    pub fn stream_ready_wait(&self) -> Duration {
        Duration::from_secs(self.stream_ready_wait)
    }

    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.first_byte_timeout)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            endpoint: None,
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
            simulated: SimulatedEngineConfig::default(),
        }
    }
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            metadata_delay_ms: default_metadata_delay_ms(),
            ready_delay_ms: default_ready_delay_ms(),
            default_file_size: default_file_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

impl ServerConfig {
    /// Base URL for links handed to clients, without a trailing slash
    pub fn public_base_url(&self) -> String {
        match (&self.base_url, self.port) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(port)) => format!("http://localhost:{}", port),
            (None, None) => "http://localhost".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port.is_none() && self.server.unix_socket.is_none() {
            bail!("Either port or unix_socket must be specified in server config");
        }

        if let Some(port) = self.server.port {
            if port == 0 {
                bail!("Server port must be greater than 0");
            }
        }

        if self.server.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        if let Some(base_url) = &self.server.base_url {
            url::Url::parse(base_url)
                .context(format!("Invalid base_url '{}'", base_url))?;
        }

        // Validate session limits
        let sessions = &self.sessions;
        if sessions.max_sessions == 0 {
            bail!("max_sessions must be greater than 0");
        }

        for (name, value) in [
            ("metadata_timeout", sessions.metadata_timeout),
            ("ready_timeout", sessions.ready_timeout),
            ("idle_threshold", sessions.idle_threshold),
            ("reaper_interval", sessions.reaper_interval),
            ("stream_ready_wait", sessions.stream_ready_wait),
            ("first_byte_timeout", sessions.first_byte_timeout),
        ] {
            if value == 0 {
                bail!("{} must be greater than 0", name);
            }
        }

        if sessions.idle_threshold <= sessions.reaper_interval {
            bail!(
                "idle_threshold ({}) must be greater than reaper_interval ({})",
                sessions.idle_threshold,
                sessions.reaper_interval
            );
        }

        // Validate engine config
        if self.engine.request_timeout == 0 {
            bail!("request_timeout must be greater than 0");
        }

        if self.engine.poll_interval == 0 {
            bail!("poll_interval must be greater than 0");
        }

        if self.engine.kind == EngineKind::Remote {
            match &self.engine.endpoint {
                Some(endpoint) if !endpoint.is_empty() => {
                    url::Url::parse(endpoint)
                        .context(format!("Invalid engine endpoint '{}'", endpoint))?;
                }
                _ => bail!("engine.endpoint must be set when engine.kind is \"remote\""),
            }
        }

        // Validate auth config
        if let Some(token) = &self.auth.token {
            if token.is_empty() {
                bail!("auth.token must not be empty; remove it to disable auth");
            }
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }
}
