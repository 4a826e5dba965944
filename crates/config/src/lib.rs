use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "careline.toml",
    "config/careline.toml",
    "crates/config/careline.toml",
    "../careline.toml",
    "../config/careline.toml",
    "../crates/config/careline.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub rest: RestConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest: RestConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Endpoint settings for the REST collaborator (room listing, history,
/// accept/close actions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "RestConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "RestConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl RestConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:7070/api".to_string()
    }

    const fn default_request_timeout() -> u64 {
        30
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Settings for the real-time socket connection.
///
/// Reconnect uses a fixed delay between attempts, bounded by
/// `max_reconnect_attempts`. There is deliberately no exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "TransportConfig::default_url")]
    pub url: String,
    #[serde(default = "TransportConfig::default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,
    #[serde(default = "TransportConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl TransportConfig {
    fn default_url() -> String {
        "ws://127.0.0.1:7070/ws/chat".to_string()
    }

    const fn default_reconnect_delay() -> u64 {
        5
    }

    const fn default_max_reconnect_attempts() -> u32 {
        12
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            reconnect_delay_seconds: Self::default_reconnect_delay(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
        }
    }
}

/// Per-room session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds before a typing indicator expires if not refreshed.
    #[serde(default = "SessionConfig::default_typing_ttl")]
    pub typing_ttl_seconds: u64,
    /// Maximum number of history messages fetched on room open.
    #[serde(default = "SessionConfig::default_history_page_size")]
    pub history_page_size: u32,
}

impl SessionConfig {
    const fn default_typing_ttl() -> u64 {
        4
    }

    const fn default_history_page_size() -> u32 {
        200
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_ttl_seconds: Self::default_typing_ttl(),
            history_page_size: Self::default_history_page_size(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use careline_config::load;
///
/// std::env::remove_var("CARELINE_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.transport.url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("rest.base_url", defaults.rest.base_url.clone())
        .unwrap()
        .set_default(
            "rest.request_timeout_seconds",
            i64::try_from(defaults.rest.request_timeout_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default("transport.url", defaults.transport.url.clone())
        .unwrap()
        .set_default(
            "transport.reconnect_delay_seconds",
            i64::try_from(defaults.transport.reconnect_delay_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "transport.max_reconnect_attempts",
            i64::from(defaults.transport.max_reconnect_attempts),
        )
        .unwrap()
        .set_default(
            "session.typing_ttl_seconds",
            i64::try_from(defaults.session.typing_ttl_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "session.history_page_size",
            i64::from(defaults.session.history_page_size),
        )
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("CARELINE").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("CARELINE_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via CARELINE_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded careline configuration");
    Ok(config)
}
