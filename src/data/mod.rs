//! This module contains everything relating to [Data].

mod session;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serenity::UserId;

use crate::error::UserError;
use crate::playback::PlaybackManager;
use crate::serenity;
use crate::Context;
pub use session::GuildSlot;
pub use session::SessionRegistry;
pub use session::VoiceSession;

/// The data kept between shards
#[derive(Debug)]
pub struct Data {
    /// List of users to send bug notifications
    pub notify_list: HashSet<UserId>,
    /// Voice sessions and the audio backend
    pub playback: Arc<PlaybackManager>,
    /// How long `play` waits for the user to name a song
    pub reply_timeout: Duration,
}

/// Is able to get guild scoped playback state.
pub trait GetData {
    /// Returns the [PlaybackManager].
    fn playback(&self) -> &PlaybackManager;
    /// Locks the guild's session for this command. Errors if not in a guild.
    async fn guild_slot(&self) -> Result<GuildSlot, UserError>;
}

impl GetData for Context<'_> {
    fn playback(&self) -> &PlaybackManager {
        &self.data().playback
    }

    async fn guild_slot(&self) -> Result<GuildSlot, UserError> {
        let guild = self.guild_id().ok_or(UserError::GuildOnly)?;
        Ok(self.playback().lock_guild(guild).await)
    }
}
