//! Manages [voice calls](songbird::Call) through songbird.
//!
//! Currently the bot monitors for the following:
//! - On disconnect, the guild's session is dropped.
//! - On track error, the error is logged.

use std::sync::Arc;

use async_trait::async_trait;
use songbird::input::{HttpRequest, Input, YoutubeDl};
use songbird::tracks::TrackHandle;
use songbird::Songbird;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::data::SessionRegistry;
use crate::error::{GatewayError, UserError};
use crate::lib::events;
use crate::playback::{PlayState, StreamLocator, Track, TrackControl, VoiceGateway};
use crate::serenity::{ChannelId, GuildId};
use crate::Context;

/// Convenience type alias for [songbird::Call].
pub type CallRef = Arc<Mutex<songbird::Call>>;

/// The guild a command was used in and the author's voice channel there, if any.
pub fn author_voice_channel(ctx: &Context<'_>) -> Result<(GuildId, Option<ChannelId>), UserError> {
    let guild = ctx.guild().ok_or(UserError::GuildOnly)?;
    let channel_id = guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|vs| vs.channel_id);
    Ok((guild.id, channel_id))
}

/// [VoiceGateway] backed by the songbird voice manager.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    sessions: SessionRegistry,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, sessions: SessionRegistry) -> Self {
        Self {
            manager,
            http,
            sessions,
        }
    }

    /// Register call events. Only happens the first time a guild's call is created.
    async fn init_call(&self, guild_id: GuildId) -> CallRef {
        if let Some(call) = self.manager.get(guild_id) {
            return call;
        }
        let call = self.manager.get_or_insert(guild_id);
        tracing::info!("Initializing call events.");
        events::DisconnectCleanup::new(&call, guild_id, self.sessions.clone())
            .register()
            .await;
        call
    }

    fn input(&self, locator: &StreamLocator) -> Input {
        match locator {
            StreamLocator::Direct(url) => HttpRequest::new(self.http.clone(), url.clone()).into(),
            StreamLocator::Page(url) => YoutubeDl::new(self.http.clone(), url.clone()).into(),
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    #[instrument(skip(self))]
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), GatewayError> {
        self.init_call(guild_id).await;
        self.manager.join(guild_id, channel_id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn leave(&self, guild_id: GuildId) -> Result<(), GatewayError> {
        self.manager.remove(guild_id).await?;
        Ok(())
    }

    #[instrument(skip(self, track), fields(track = %track.title))]
    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
    ) -> Result<Box<dyn TrackControl>, GatewayError> {
        let call = self.manager.get(guild_id).ok_or(GatewayError::NoCall)?;
        let input = self.input(&track.locator);

        let handle = {
            let mut call = call.lock().await;
            if call.current_channel().is_none() {
                return Err(GatewayError::NoCall);
            }
            call.play_only_input(input)
        };
        events::TrackErrorLog::new(&track.title).register(&handle)?;

        Ok(Box::new(handle))
    }
}

#[async_trait]
impl TrackControl for TrackHandle {
    fn stop(&self) -> Result<(), GatewayError> {
        Ok(TrackHandle::stop(self)?)
    }

    fn pause(&self) -> Result<(), GatewayError> {
        Ok(TrackHandle::pause(self)?)
    }

    fn resume(&self) -> Result<(), GatewayError> {
        Ok(self.play()?)
    }

    async fn state(&self) -> PlayState {
        use songbird::tracks::PlayMode;

        match self.get_info().await {
            Ok(info) => match info.playing {
                PlayMode::Play => PlayState::Playing,
                PlayMode::Pause => PlayState::Paused,
                _ => PlayState::Stopped,
            },
            // The driver drops finished tracks.
            Err(_) => PlayState::Stopped,
        }
    }
}
