use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "souk.toml",
    "config/souk.toml",
    "crates/config/souk.toml",
    "../souk.toml",
    "../config/souk.toml",
    "../crates/config/souk.toml",
];

/// Longest session lifetime the authenticator accepts: ten years.
pub const MAX_SESSION_TTL_SECONDS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Reject values the services cannot operate with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.messaging.history_page_size == 0 {
            bail!("messaging.history_page_size must be greater than zero");
        }
        if self.messaging.max_message_length == 0 {
            bail!("messaging.max_message_length must be greater than zero");
        }
        if self.realtime.channel.trim().is_empty() {
            bail!("realtime.channel must not be empty");
        }
        if self.auth.session_ttl_seconds == 0
            || self.auth.session_ttl_seconds > MAX_SESSION_TTL_SECONDS
        {
            bail!("auth.session_ttl_seconds must be between 1 and {MAX_SESSION_TTL_SECONDS}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://souk.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: Self::default_session_ttl(),
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400
    }
}

/// Limits and behaviour of the conversation services.
///
/// ```
/// use souk_config::MessagingConfig;
///
/// let messaging = MessagingConfig::default();
/// assert_eq!(messaging.history_page_size, 50);
/// assert_eq!(messaging.max_message_length, 2000);
/// assert!(messaging.mark_read_on_fetch);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "MessagingConfig::default_page_size")]
    pub history_page_size: u32,
    #[serde(default = "MessagingConfig::default_max_length")]
    pub max_message_length: usize,
    /// Fetching history flips the caller's incoming messages to read.
    #[serde(default = "MessagingConfig::default_mark_read_on_fetch")]
    pub mark_read_on_fetch: bool,
}

impl MessagingConfig {
    const fn default_page_size() -> u32 {
        50
    }

    const fn default_max_length() -> usize {
        2000
    }

    const fn default_mark_read_on_fetch() -> bool {
        true
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            history_page_size: Self::default_page_size(),
            max_message_length: Self::default_max_length(),
            mark_read_on_fetch: Self::default_mark_read_on_fetch(),
        }
    }
}

/// Cross-instance fan-out. Without a redis url every broadcast stays in-process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "RealtimeConfig::default_channel")]
    pub channel: String,
}

impl RealtimeConfig {
    fn default_channel() -> String {
        "souk:rooms".to_string()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: Self::default_channel(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use souk_config::load;
///
/// std::env::remove_var("SOUK_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let session_ttl = i64::try_from(defaults.auth.session_ttl_seconds).unwrap_or(i64::MAX);
    let max_length = i64::try_from(defaults.messaging.max_message_length).unwrap_or(i64::MAX);

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.session_ttl_seconds", session_ttl)?
        .set_default(
            "messaging.history_page_size",
            i64::from(defaults.messaging.history_page_size),
        )?
        .set_default("messaging.max_message_length", max_length)?
        .set_default(
            "messaging.mark_read_on_fetch",
            defaults.messaging.mark_read_on_fetch,
        )?
        .set_default("realtime.channel", defaults.realtime.channel.clone())?;

    let environment_overrides = config::Environment::with_prefix("SOUK").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("SOUK_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via SOUK_CONFIG");
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

    config.validate().context("invalid configuration")?;

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
