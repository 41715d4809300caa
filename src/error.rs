//! Error types used throughout the bot.
//!
//! [EncoreError] is the error type of every command. [SessionError] carries the
//! playback failures a user can cause or observe, and is always converted into
//! a one-line reply by [handle_framework_error](crate::log::handle_framework_error).

use std::time::Duration;

use thiserror::Error;

use crate::serenity;

/// Top level error of the bot.
#[derive(Debug, Error)]
pub enum EncoreError {
    /// A mistake on the user's side detected by the framework.
    #[error(transparent)]
    UserError(#[from] UserError),

    /// A playback request that could not be fulfilled.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Check failed: {}", reason.as_deref().unwrap_or("no reason given"))]
    CheckFailed { reason: Option<String> },

    #[error("Command panicked: {}", payload.as_deref().unwrap_or("no payload"))]
    Panic { payload: Option<String> },

    #[error(transparent)]
    Serenity(#[from] serenity::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Errors caused by how a user invoked a command.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("This command only works in a server.")]
    GuildOnly,

    #[error("Couldn't understand `{}`.", input.as_deref().unwrap_or_default())]
    BadArgs { input: Option<String> },

    #[error("Slow down! Try again in {}s.", remaining_cooldown.as_secs())]
    OnCooldown { remaining_cooldown: Duration },

    #[error("I'm missing permissions: {missing_permissions}")]
    MissingBotPermissions {
        missing_permissions: serenity::Permissions,
    },

    #[error("You're missing permissions: {}", missing_permissions.map(|p| p.to_string()).unwrap_or_default())]
    MissingUserPermissions {
        missing_permissions: Option<serenity::Permissions>,
    },
}

/// Failures of a playback request.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("You need to join a voice channel first.")]
    NotInVoiceChannel,

    #[error("Couldn't connect to the voice channel: {0}")]
    ConnectError(#[source] GatewayError),

    #[error("Search failed: {0}")]
    ExtractionError(#[source] BackendError),

    #[error("Couldn't find anything playable for `{query}`.")]
    NoResultsError { query: String },

    #[error("Playback failed: {0}")]
    PlaybackError(#[source] GatewayError),

    #[error("No reply within {} seconds, playback cancelled.", waited.as_secs())]
    TimeoutError { waited: Duration },

    #[error("The audio backend is unavailable ({reason}).")]
    BackendUnavailable { reason: String },

    #[error("I'm not in a voice channel.")]
    NoSession,

    #[error("Nothing is playing right now.")]
    NothingPlaying,

    #[error("Nothing is paused right now.")]
    NothingPaused,
}

impl SessionError {
    /// Whether this error points at something broken rather than at user input.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::ConnectError(_)
                | Self::ExtractionError(_)
                | Self::PlaybackError(_)
                | Self::BackendUnavailable { .. }
        )
    }
}

/// Errors from the voice connection layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no voice connection for this server")]
    NoCall,

    #[error(transparent)]
    Join(#[from] songbird::error::JoinError),

    #[error(transparent)]
    Control(#[from] songbird::error::ControlError),
}

/// Errors from an audio backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("couldn't launch yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("yt-dlp failed: {stderr}")]
    Extractor { stderr: String },

    #[error("unreadable backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("relay couldn't load the track: {message}")]
    LoadFailed { message: String },

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("backend didn't answer within {}s", after.as_secs())]
    TimedOut { after: Duration },
}

impl BackendError {
    /// Whether the backend could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Spawn(_) | Self::TimedOut { .. } => true,
            _ => false,
        }
    }
}

/// Errors while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Missing discord token. Set TOKEN or `discord_token` in config.toml.")]
    MissingToken,
}
