//! Event handling

use async_trait::async_trait;
use songbird::tracks::TrackHandle;
use songbird::CoreEvent;
use songbird::Event;
use songbird::EventContext;
use songbird::EventHandler;
use songbird::TrackEvent;

use super::call::CallRef;
use crate::data::SessionRegistry;
use crate::error::GatewayError;
use crate::serenity::GuildId;

/// Drop the guild's session once the bot is no longer in a voice channel.
pub(super) struct DisconnectCleanup {
    /// The call to check.
    call: CallRef,
    guild_id: GuildId,
    sessions: SessionRegistry,
}

impl DisconnectCleanup {
    /// Constructor for [DisconnectCleanup]
    pub(super) fn new(call: &CallRef, guild_id: GuildId, sessions: SessionRegistry) -> Self {
        let call = call.clone();
        Self {
            call,
            guild_id,
            sessions,
        }
    }

    /// Register this as a global event.
    pub(super) async fn register(self) {
        tracing::debug!("Registering disconnect cleanup global event.");
        let call = self.call.clone();
        let mut call = call.lock().await;
        call.add_global_event(Event::Core(CoreEvent::DriverDisconnect), self);
    }
}

#[async_trait]
impl EventHandler for DisconnectCleanup {
    async fn act(&self, _ectx: &EventContext<'_>) -> Option<Event> {
        // Moving channels also reconnects the driver, but keeps a channel.
        let disconnected = async { self.call.lock().await.current_channel().is_none() };
        if self.sessions.clear_if(self.guild_id, disconnected).await.is_some() {
            tracing::info!("Voice connection dropped, session cleared.");
        }
        None
    }
}

/// Log playback errors of a track.
pub(super) struct TrackErrorLog {
    title: String,
}

impl TrackErrorLog {
    pub(super) fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }

    pub(super) fn register(self, handle: &TrackHandle) -> Result<(), GatewayError> {
        handle.add_event(Event::Track(TrackEvent::Error), self)?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for TrackErrorLog {
    async fn act(&self, ectx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(states) = ectx {
            for (state, _handle) in *states {
                tracing::error!("Player error on '{}': {:?}", self.title, state.playing);
            }
        }
        None
    }
}
