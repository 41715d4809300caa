//! The voice side of playback: joining channels and controlling audio sources.

use std::fmt::Debug;

use async_trait::async_trait;

use super::backend::Track;
use crate::error::GatewayError;
use crate::serenity::{ChannelId, GuildId};

/// What an audio source is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
    /// Finished, stopped, or errored.
    Stopped,
}

impl PlayState {
    /// Playing or paused.
    pub fn is_active(self) -> bool {
        !matches!(self, PlayState::Stopped)
    }
}

/// Control over one started audio source.
#[async_trait]
pub trait TrackControl: Send + Sync + Debug {
    fn stop(&self) -> Result<(), GatewayError>;
    fn pause(&self) -> Result<(), GatewayError>;
    fn resume(&self) -> Result<(), GatewayError>;
    async fn state(&self) -> PlayState;
}

/// Voice connections owned by the chat gateway.
///
/// Connections are looked up by guild on every call, a guild without one
/// fails with [GatewayError::NoCall].
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join `channel_id`, or move there if already connected in this guild.
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), GatewayError>;

    /// Leave the guild's voice channel and drop the connection.
    async fn leave(&self, guild_id: GuildId) -> Result<(), GatewayError>;

    /// Start `track` on the guild's connection, replacing anything playing.
    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
    ) -> Result<Box<dyn TrackControl>, GatewayError>;
}
