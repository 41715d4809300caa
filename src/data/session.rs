//! Per-guild voice sessions.
//!
//! Every guild owns one slot holding at most one [VoiceSession]. Commands lock
//! their guild's slot for as long as they run, so commands within a guild are
//! handled one at a time while other guilds proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::SessionError;
use crate::playback::{NodeStatus, TrackControl};
use crate::serenity::{ChannelId, GuildId};

/// This bot's record of its voice connection and playback in one guild.
#[derive(Debug)]
pub struct VoiceSession {
    pub guild_id: GuildId,
    pub voice_channel_id: Option<ChannelId>,
    /// The source started last, if any.
    pub current: Option<Box<dyn TrackControl>>,
    pub current_track_title: Option<String>,
    /// Backend status as last seen by this session.
    pub node_status: NodeStatus,
}

impl VoiceSession {
    pub fn new(guild_id: GuildId, voice_channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            voice_channel_id: Some(voice_channel_id),
            current: None,
            current_track_title: None,
            node_status: NodeStatus::Disconnected,
        }
    }
}

type Slot = Arc<Mutex<Option<VoiceSession>>>;
type Slots = Arc<StdMutex<HashMap<GuildId, Slot>>>;

/// Guild → session mapping. Cheap to clone.
///
/// A guild's slot is forgotten once it is released empty with nobody waiting on it.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    slots: Slots,
}

impl SessionRegistry {
    /// Lock the guild's slot, waiting for any command already holding it.
    pub async fn lock(&self, guild_id: GuildId) -> GuildSlot {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(guild_id).or_default().clone()
        };
        GuildSlot {
            guild_id,
            session: slot.lock_owned().await,
            slots: self.slots.clone(),
        }
    }

    /// Clear the guild's session if `disconnected` resolves to true.
    ///
    /// `disconnected` is only awaited once the slot is held, so a command that
    /// reconnected in the meantime keeps its session.
    pub async fn clear_if(
        &self,
        guild_id: GuildId,
        disconnected: impl Future<Output = bool>,
    ) -> Option<VoiceSession> {
        let mut slot = self.lock(guild_id).await;
        if !disconnected.await {
            return None;
        }
        slot.clear()
    }

    /// Whether the guild currently has a session. Waits for the slot.
    pub async fn contains(&self, guild_id: GuildId) -> bool {
        self.lock(guild_id).await.session().is_some()
    }
}

/// Exclusive access to one guild's session for the duration of a command.
#[derive(Debug)]
pub struct GuildSlot {
    guild_id: GuildId,
    session: OwnedMutexGuard<Option<VoiceSession>>,
    slots: Slots,
}

impl GuildSlot {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn session(&self) -> Option<&VoiceSession> {
        self.session.as_ref()
    }

    /// The session, or [SessionError::NoSession] when not connected.
    pub fn require(&mut self) -> Result<&mut VoiceSession, SessionError> {
        self.session.as_mut().ok_or(SessionError::NoSession)
    }

    pub(crate) fn insert(&mut self, session: VoiceSession) -> &mut VoiceSession {
        self.session.insert(session)
    }

    /// Take the session out, stopping whatever it was playing.
    pub(crate) fn clear(&mut self) -> Option<VoiceSession> {
        let session = self.session.take()?;
        if let Some(current) = &session.current {
            if let Err(e) = current.stop() {
                tracing::debug!("Source already gone while clearing session: {e}");
            }
        }
        Some(session)
    }
}

impl Drop for GuildSlot {
    fn drop(&mut self) {
        if self.session.is_some() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mutex = OwnedMutexGuard::mutex(&self.session);
        // Waiters clone the slot under the map lock, so the map and this guard
        // being the only holders means nobody else will use it.
        let unused = slots
            .get(&self.guild_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, mutex) && Arc::strong_count(slot) == 2);
        if unused {
            slots.remove(&self.guild_id);
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn guild(id: u64) -> GuildId {
        GuildId::new(id)
    }

    #[tokio::test]
    async fn one_session_per_guild() {
        let registry = SessionRegistry::default();
        {
            let mut slot = registry.lock(guild(1)).await;
            slot.insert(VoiceSession::new(guild(1), ChannelId::new(10)));
        }
        {
            let mut slot = registry.lock(guild(1)).await;
            // Replacing, never adding a second one.
            slot.insert(VoiceSession::new(guild(1), ChannelId::new(11)));
            assert_eq!(
                slot.session().unwrap().voice_channel_id,
                Some(ChannelId::new(11))
            );
        }
        assert!(registry.contains(guild(1)).await);
        assert!(!registry.contains(guild(2)).await);
    }

    #[tokio::test]
    async fn missing_session_fails_closed() {
        let registry = SessionRegistry::default();
        let mut slot = registry.lock(guild(1)).await;
        assert!(matches!(slot.require(), Err(SessionError::NoSession)));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_in_one_guild_are_serialised() {
        let registry = SessionRegistry::default();
        let first = registry.lock(guild(1)).await;

        // Another guild is not held up.
        tokio::time::timeout(Duration::from_secs(1), registry.lock(guild(2)))
            .await
            .unwrap();

        let waiting = tokio::time::timeout(Duration::from_secs(1), registry.lock(guild(1))).await;
        assert!(waiting.is_err());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), registry.lock(guild(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clear_destroys_the_session() {
        let registry = SessionRegistry::default();
        registry
            .lock(guild(1))
            .await
            .insert(VoiceSession::new(guild(1), ChannelId::new(10)));

        assert!(registry.lock(guild(1)).await.clear().is_some());
        assert!(!registry.contains(guild(1)).await);
        assert!(registry.lock(guild(1)).await.clear().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_while_waiting_keeps_the_session() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let registry = SessionRegistry::default();
        let connected = Arc::new(AtomicBool::new(false));
        // A join is underway when the disconnect is noticed.
        let mut joining = registry.lock(guild(1)).await;

        let cleanup = tokio::spawn({
            let registry = registry.clone();
            let connected = connected.clone();
            async move {
                registry
                    .clear_if(guild(1), async move { !connected.load(Ordering::SeqCst) })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        joining.insert(VoiceSession::new(guild(1), ChannelId::new(10)));
        connected.store(true, Ordering::SeqCst);
        drop(joining);

        assert!(cleanup.await.unwrap().is_none());
        assert!(registry.contains(guild(1)).await);
    }

    #[tokio::test]
    async fn disconnect_clears_the_session() {
        let registry = SessionRegistry::default();
        registry
            .lock(guild(1))
            .await
            .insert(VoiceSession::new(guild(1), ChannelId::new(10)));

        assert!(registry.clear_if(guild(1), async { true }).await.is_some());
        assert!(!registry.contains(guild(1)).await);
    }

    fn tracked(registry: &SessionRegistry) -> usize {
        registry.slots.lock().unwrap().len()
    }

    #[tokio::test]
    async fn empty_slots_are_forgotten() {
        let registry = SessionRegistry::default();
        registry
            .lock(guild(1))
            .await
            .insert(VoiceSession::new(guild(1), ChannelId::new(10)));
        assert!(!registry.contains(guild(2)).await);
        assert_eq!(tracked(&registry), 1);

        registry.lock(guild(1)).await.clear();
        assert_eq!(tracked(&registry), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_with_a_waiter_is_kept() {
        let registry = SessionRegistry::default();
        let first = registry.lock(guild(1)).await;

        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move {
                let mut slot = registry.lock(guild(1)).await;
                slot.insert(VoiceSession::new(guild(1), ChannelId::new(10)));
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Released empty, but the waiter must still see the same slot.
        drop(first);
        waiter.await.unwrap();

        assert!(registry.contains(guild(1)).await);
        assert_eq!(tracked(&registry), 1);
    }
}
