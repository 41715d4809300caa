//! Configuration for running this bot.
//!
//! Settings come from an optional [CONFIG_PATH] file, then environment
//! variables override them. Only the discord token is required, anything
//! unreadable falls back to its default and is reported by [Config::problems].

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use poise::Framework;
use serde::Deserialize;
use serde::Serialize;
use serenity::UserId;

use crate::error::ConfigError;
use crate::playback::{RetryPolicy, DEFAULT_BACKEND_TIMEOUT, DEFAULT_REPLY_TIMEOUT};
use crate::serenity;

/// The path to the config file
const CONFIG_PATH: &str = "config.toml";

/// Settings that modify bot behavior.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Token needed to use a bot account.
    discord_token: String,

    /// Prefix of text commands.
    prefix: String,

    /// See [LoggingConfig]
    logging: LoggingConfig,

    /// See [BackendNodeConfig]
    backend: BackendNodeConfig,

    /// See [PlaybackConfig]
    playback: PlaybackConfig,

    /// See [KeepAliveConfig]
    keepalive: KeepAliveConfig,

    /// Useful developer specific configs.
    dev_utils: DevConfig,

    /// Settings that couldn't be used, kept to be logged once tracing is up.
    #[serde(skip)]
    problems: Vec<String>,
}

impl Config {
    /// Reads [CONFIG_PATH] if it exists and applies environment overrides.
    /// A missing, empty or broken file means default settings.
    pub fn read() -> Config {
        let mut problems = Vec::new();
        let content = match std::fs::read_to_string(CONFIG_PATH) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                problems.push(format!("Couldn't read {CONFIG_PATH}: {e}"));
                String::new()
            }
        };
        let mut config = Config::parse(&content).unwrap_or_else(|e| {
            problems.push(format!("Ignoring {CONFIG_PATH}. {e}"));
            Config::default()
        });
        config.problems = problems;
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Parse toml content. Errors name the offending key.
    fn parse(content: &str) -> Result<Config, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let to_toml = toml::Deserializer::new(content);
        serde_path_to_error::deserialize(to_toml).map_err(|error| ConfigError::InvalidConfig {
            reason: error.to_string(),
        })
    }

    /// Override settings with whatever `env` knows about.
    ///
    /// A bad keep-alive port keeps the default. A bad backend setting leaves
    /// the bot without a backend, see [BackendNodeConfig::invalid].
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(token) = env("TOKEN").or_else(|| env("DISCORD_TOKEN")) {
            self.discord_token = token;
        }
        if let Some(prefix) = env("COMMAND_PREFIX") {
            self.prefix = prefix;
        }
        if let Some(port) = env("PORT") {
            match parse_var("PORT", &port) {
                Ok(port) => self.keepalive.port = port,
                Err(e) => self.problems.push(format!("{e}, keeping port {}", self.keepalive.port)),
            }
        }
        if let Some(host) = env("BACKEND_HOST") {
            self.backend.host = Some(host);
        }
        if let Some(password) = env("BACKEND_PASSWORD") {
            self.backend.password = password;
        }

        let backend = [
            env("BACKEND_KIND").map(|v| parse_var("BACKEND_KIND", &v).map(|k| self.backend.kind = k)),
            env("BACKEND_PORT").map(|v| parse_var("BACKEND_PORT", &v).map(|p| self.backend.port = p)),
            env("BACKEND_SECURE").map(|v| parse_flag("BACKEND_SECURE", &v).map(|s| self.backend.secure = s)),
        ];
        for error in backend.into_iter().flatten().filter_map(Result::err) {
            self.problems.push(format!("{error}, the audio backend is disabled"));
            if self.backend.invalid.is_none() {
                self.backend.invalid = Some(error.to_string());
            }
        }
    }

    /// Settings that were ignored while reading the config.
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    /// Basic sanity check for if a token was given.
    pub fn token(&self) -> Result<&String, ConfigError> {
        if self.discord_token.trim().is_empty() {
            Err(ConfigError::MissingToken)
        } else {
            Ok(&self.discord_token)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Construct a bug notification notify list based on the config.
    /// Wrapper for [NotifyConfig::notify_list]
    pub fn notify_list<U, E>(&self, fw: &Framework<U, E>) -> HashSet<UserId> {
        self.dev_utils.notifications.notify_list(fw)
    }

    /// Getter for log_dir.
    pub fn log_dir(&self) -> &str {
        &self.logging.log_dir
    }

    /// Is debug mode enabled for console logs
    pub fn console_debug(&self) -> bool {
        self.logging.console_debug
    }

    /// Is file logging enabled.
    pub fn logs_enabled(&self) -> bool {
        self.logging.logs_enabled
    }

    pub fn backend(&self) -> &BackendNodeConfig {
        &self.backend
    }

    /// How long `play` waits for the query.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.playback.reply_timeout_secs)
    }

    /// Port of the keep-alive server, `None` if disabled.
    pub fn keepalive_port(&self) -> Option<u16> {
        self.keepalive.enabled.then_some(self.keepalive.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            prefix: "!".to_string(),

            logging: LoggingConfig::default(),
            backend: BackendNodeConfig::default(),
            playback: PlaybackConfig::default(),
            keepalive: KeepAliveConfig::default(),

            dev_utils: DevConfig {
                notifications: NotifyConfig {
                    enabled: false,
                    add_owners: true,
                    userids: vec![],
                },
            },

            problems: Vec::new(),
        }
    }
}

/// Configs for
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    /// Print debug traces to console?
    console_debug: bool,
    /// Enable writing to log file?
    logs_enabled: bool,
    /// Directory to store log files
    log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_debug: false,
            logs_enabled: true,
            log_dir: "logs".to_string(),
        }
    }
}

/// Which audio backend resolves queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local yt-dlp binary.
    #[default]
    Ytdlp,
    /// Remote relay node.
    Relay,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ytdlp" | "yt-dlp" => Ok(Self::Ytdlp),
            "relay" | "lavalink" => Ok(Self::Relay),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Where the audio backend lives and how hard to try reaching it at startup.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendNodeConfig {
    pub(super) kind: BackendKind,
    /// Relay host. Without one, the relay backend is unavailable.
    pub(super) host: Option<String>,
    pub(super) port: u16,
    pub(super) password: String,
    /// Use https for the relay.
    pub(super) secure: bool,
    /// Path or name of the yt-dlp binary.
    pub(super) ytdlp_path: String,
    connect_attempts: u32,
    retry_delay_secs: u64,
    /// Limit for a single probe or lookup.
    timeout_secs: u64,
    /// Why the backend settings can't be used, if they can't.
    #[serde(skip)]
    pub(super) invalid: Option<String>,
}

impl BackendNodeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_secs(self.retry_delay_secs),
        )
    }
}

impl Default for BackendNodeConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            host: None,
            port: 2333,
            password: String::new(),
            secure: false,
            ytdlp_path: "yt-dlp".to_string(),
            connect_attempts: 5,
            retry_delay_secs: 3,
            timeout_secs: DEFAULT_BACKEND_TIMEOUT.as_secs(),
            invalid: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct PlaybackConfig {
    /// Seconds `play` waits for the user to name a song.
    reply_timeout_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: DEFAULT_REPLY_TIMEOUT.as_secs(),
        }
    }
}

/// Liveness endpoint for hosting platforms.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct KeepAliveConfig {
    enabled: bool,
    port: u16,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 10000,
        }
    }
}

/// Optional configs to enable developer-specific behavior.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DevConfig {
    /// See [NotifyConfig]
    notifications: NotifyConfig,
}

/// Configs for notification behavior when encountering unexpected errors.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct NotifyConfig {
    /// Enable this behavior or not. (bot sends a private message)
    enabled: bool,
    /// Whether to automatically add owners to the notify list.
    add_owners: bool,
    /// Additional users to add to the notify list.
    userids: Vec<UserId>,
}

impl NotifyConfig {
    /// Construct a bug notification notify list based on the config.
    fn notify_list<U, E>(&self, fw: &Framework<U, E>) -> HashSet<UserId> {
        let mut notify_list = HashSet::new();

        // If disabled, don't add anyone to the list.
        if !self.enabled {
            return notify_list;
        }

        // Add bot owners if enabled
        if self.add_owners {
            let owners = &fw.options().owners;
            for userid in owners {
                notify_list.insert(*userid);
            }
        }

        // Add users in config
        for userid in &self.userids {
            notify_list.insert(*userid);
        }

        notify_list
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ConfigError::InvalidConfig {
        reason: format!("{name}={value}: {e}"),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidConfig {
            reason: format!("{name}={value}: expected true or false"),
        }),
    }
}
