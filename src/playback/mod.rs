//! Playback session management.
//!
//! [PlaybackManager] ties a guild's [VoiceSession] to the voice gateway and the
//! audio backend. Commands lock a [GuildSlot] first and pass it in, which keeps
//! each guild to one command at a time.

mod backend;
mod gateway;
mod prompt;

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::instrument;

pub use backend::{
    AudioBackend, BackendLink, NodeStatus, RetryPolicy, StreamLocator, Track,
    DEFAULT_BACKEND_TIMEOUT,
};
pub use gateway::{PlayState, TrackControl, VoiceGateway};
pub use prompt::{await_query_from_user, DEFAULT_REPLY_TIMEOUT};

use crate::data::{GuildSlot, SessionRegistry, VoiceSession};
use crate::error::SessionError;
use crate::serenity::{ChannelId, GuildId, UserId};
use prompt::IncomingMessage;

/// What [PlaybackManager::ensure_voice_connection] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Moved,
    Stayed,
}

/// Owns voice sessions, the gateway and the backend link.
pub struct PlaybackManager {
    gateway: Arc<dyn VoiceGateway>,
    link: Arc<BackendLink>,
    sessions: SessionRegistry,
}

impl PlaybackManager {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        link: Arc<BackendLink>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            gateway,
            link,
            sessions,
        }
    }

    /// Lock a guild for the duration of a command.
    pub async fn lock_guild(&self, guild_id: GuildId) -> GuildSlot {
        self.sessions.lock(guild_id).await
    }

    /// The shared link to the audio backend.
    pub fn link(&self) -> &BackendLink {
        &self.link
    }

    /// Make sure the bot sits in the requester's voice channel.
    #[instrument(skip(self, slot), fields(guild = %slot.guild_id()))]
    pub async fn ensure_voice_connection<'a>(
        &self,
        slot: &'a mut GuildSlot,
        requester_channel: Option<ChannelId>,
    ) -> Result<(&'a mut VoiceSession, JoinOutcome), SessionError> {
        let channel_id = requester_channel.ok_or(SessionError::NotInVoiceChannel)?;
        let guild_id = slot.guild_id();

        let outcome = match slot.session() {
            Some(session) if session.voice_channel_id == Some(channel_id) => JoinOutcome::Stayed,
            Some(_) => JoinOutcome::Moved,
            None => JoinOutcome::Joined,
        };

        if outcome != JoinOutcome::Stayed {
            tracing::info!("Joining voice channel {channel_id}.");
            self.gateway
                .join(guild_id, channel_id)
                .await
                .map_err(SessionError::ConnectError)?;
        }

        let session = match outcome {
            JoinOutcome::Joined => {
                let mut session = VoiceSession::new(guild_id, channel_id);
                session.node_status = self.link.status();
                slot.insert(session)
            }
            JoinOutcome::Moved | JoinOutcome::Stayed => {
                let session = slot.require()?;
                session.voice_channel_id = Some(channel_id);
                session
            }
        };
        Ok((session, outcome))
    }

    /// Turn a url or free text into a playable [Track].
    ///
    /// A failed lookup is retried once as an explicit search.
    #[instrument(skip(self))]
    pub async fn resolve_query(&self, raw_query: &str) -> Result<Track, SessionError> {
        let query = raw_query.trim();
        let no_results = || SessionError::NoResultsError {
            query: query.to_string(),
        };
        if query.is_empty() {
            return Err(no_results());
        }

        let backend = self.link.ensure_ready().await?;

        let first_error = match self.link.lookup(&*backend, query).await {
            Ok(found) => return found.ok_or_else(no_results),
            Err(e) => e,
        };
        if first_error.is_unreachable() {
            self.link.mark_lost();
            return Err(SessionError::ExtractionError(first_error));
        }

        tracing::debug!("Lookup failed ({first_error}), retrying as a search.");
        let search = backend.search_directive(query);
        match self.link.lookup(&*backend, &search).await {
            Ok(found) => found.ok_or_else(no_results),
            Err(e) => {
                tracing::debug!("Search fallback failed too: {e}");
                if e.is_unreachable() {
                    self.link.mark_lost();
                }
                Err(SessionError::ExtractionError(first_error))
            }
        }
    }

    /// Play `track` in the session, pre-empting whatever was playing.
    #[instrument(skip(self, session), fields(guild = %session.guild_id, track = %track.title))]
    pub async fn start_playback(
        &self,
        session: &mut VoiceSession,
        track: &Track,
    ) -> Result<(), SessionError> {
        if let Some(previous) = session.current.take() {
            if previous.state().await.is_active() {
                tracing::debug!("Stopping the previous source.");
                previous.stop().map_err(SessionError::PlaybackError)?;
            }
        }
        session.current_track_title = None;
        session.node_status = self.link.status();

        let handle = self
            .gateway
            .play(session.guild_id, track)
            .await
            .map_err(SessionError::PlaybackError)?;

        tracing::info!("Now playing {track}.");
        session.current = Some(handle);
        session.current_track_title = Some(track.title.clone());
        Ok(())
    }

    /// Resolve `query` and start it in the guild's session.
    pub async fn play_query(&self, slot: &mut GuildSlot, query: &str) -> Result<Track, SessionError> {
        let track = self.resolve_query(query).await?;
        let session = slot.require()?;
        self.start_playback(session, &track).await?;
        Ok(track)
    }

    /// Wait for `requester` to name a track in `channel`, then play it.
    ///
    /// Nothing is looked up when the wait runs out. The reply is handed back
    /// together with the track so the caller can clean it up.
    pub async fn play_from_reply<S>(
        &self,
        slot: &mut GuildSlot,
        messages: S,
        requester: UserId,
        channel: ChannelId,
        deadline: Duration,
    ) -> Result<(Track, S::Item), SessionError>
    where
        S: Stream,
        S::Item: IncomingMessage,
    {
        let reply = await_query_from_user(messages, requester, channel, deadline).await?;
        let track = self.play_query(slot, reply.text()).await?;
        Ok((track, reply))
    }

    /// Stop playback but stay in the channel.
    pub async fn stop(&self, slot: &mut GuildSlot) -> Result<(), SessionError> {
        let session = slot.require()?;
        if let Some(current) = session.current.take() {
            if current.state().await.is_active() {
                current.stop().map_err(SessionError::PlaybackError)?;
            }
        }
        session.current_track_title = None;
        Ok(())
    }

    /// Pause the playing source. Returns its title.
    pub async fn pause(&self, slot: &mut GuildSlot) -> Result<Option<String>, SessionError> {
        let session = slot.require()?;
        let current = session.current.as_ref().ok_or(SessionError::NothingPlaying)?;
        if current.state().await != PlayState::Playing {
            return Err(SessionError::NothingPlaying);
        }
        current.pause().map_err(SessionError::PlaybackError)?;
        Ok(session.current_track_title.clone())
    }

    /// Resume the paused source. Returns its title.
    pub async fn resume(&self, slot: &mut GuildSlot) -> Result<Option<String>, SessionError> {
        let session = slot.require()?;
        let current = session.current.as_ref().ok_or(SessionError::NothingPaused)?;
        if current.state().await != PlayState::Paused {
            return Err(SessionError::NothingPaused);
        }
        current.resume().map_err(SessionError::PlaybackError)?;
        Ok(session.current_track_title.clone())
    }

    /// Leave the voice channel and destroy the session.
    #[instrument(skip(self, slot), fields(guild = %slot.guild_id()))]
    pub async fn leave(&self, slot: &mut GuildSlot) -> Result<(), SessionError> {
        let guild_id = slot.guild_id();
        slot.clear().ok_or(SessionError::NoSession)?;
        self.gateway
            .leave(guild_id)
            .await
            .map_err(SessionError::ConnectError)
    }
}

impl std::fmt::Debug for PlaybackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackManager")
            .field("link", &self.link)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use futures::stream::{self, StreamExt};
    use tokio::time::Instant;

    use super::backend::test::{track, FakeBackend};
    use super::prompt::test::{msg, Msg};
    use super::*;
    use crate::error::GatewayError;

    /// What the fake gateway and its sources were asked to do.
    pub type Events = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    pub struct FakeSource {
        name: String,
        state: Mutex<PlayState>,
        events: Events,
    }

    #[async_trait]
    impl TrackControl for FakeSource {
        fn stop(&self) -> Result<(), GatewayError> {
            *self.state.lock().unwrap() = PlayState::Stopped;
            self.events.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
        fn pause(&self) -> Result<(), GatewayError> {
            *self.state.lock().unwrap() = PlayState::Paused;
            self.events.lock().unwrap().push(format!("pause {}", self.name));
            Ok(())
        }
        fn resume(&self) -> Result<(), GatewayError> {
            *self.state.lock().unwrap() = PlayState::Playing;
            self.events.lock().unwrap().push(format!("resume {}", self.name));
            Ok(())
        }
        async fn state(&self) -> PlayState {
            *self.state.lock().unwrap()
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeGateway {
        pub events: Events,
        pub refuse_join: bool,
    }

    #[async_trait]
    impl VoiceGateway for FakeGateway {
        async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), GatewayError> {
            if self.refuse_join {
                return Err(GatewayError::NoCall);
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("join {guild_id} {channel_id}"));
            Ok(())
        }

        async fn leave(&self, guild_id: GuildId) -> Result<(), GatewayError> {
            self.events.lock().unwrap().push(format!("leave {guild_id}"));
            Ok(())
        }

        async fn play(
            &self,
            _guild_id: GuildId,
            track: &Track,
        ) -> Result<Box<dyn TrackControl>, GatewayError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("play {}", track.title));
            Ok(Box::new(FakeSource {
                name: track.title.clone(),
                state: Mutex::new(PlayState::Playing),
                events: self.events.clone(),
            }))
        }
    }

    pub struct Harness {
        pub manager: PlaybackManager,
        pub gateway: Arc<FakeGateway>,
        pub backend: Arc<FakeBackend>,
        pub sessions: SessionRegistry,
    }

    impl Harness {
        pub fn new(backend: FakeBackend) -> Self {
            Self::with_gateway(FakeGateway::default(), backend)
        }

        pub fn with_gateway(gateway: FakeGateway, backend: FakeBackend) -> Self {
            let gateway = Arc::new(gateway);
            let backend = Arc::new(backend);
            let sessions = SessionRegistry::default();
            let link = Arc::new(BackendLink::new(Some(backend.clone())));
            let manager = PlaybackManager::new(gateway.clone(), link, sessions.clone());
            Self {
                manager,
                gateway,
                backend,
                sessions,
            }
        }

        pub fn events(&self) -> Vec<String> {
            self.gateway.events.lock().unwrap().clone()
        }
    }

    const URL: &str = "https://media.example/track.webm";

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn voice() -> ChannelId {
        ChannelId::new(10)
    }

    #[tokio::test]
    async fn joins_then_moves_then_stays() {
        let h = Harness::new(FakeBackend::reachable());
        let mut slot = h.manager.lock_guild(guild()).await;

        let (_, outcome) = h
            .manager
            .ensure_voice_connection(&mut slot, Some(voice()))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Joined);

        let other = ChannelId::new(11);
        let (session, outcome) = h
            .manager
            .ensure_voice_connection(&mut slot, Some(other))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Moved);
        assert_eq!(session.voice_channel_id, Some(other));

        let (_, outcome) = h
            .manager
            .ensure_voice_connection(&mut slot, Some(other))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Stayed);

        assert_eq!(h.events(), vec!["join 1 10", "join 1 11"]);
    }

    #[tokio::test]
    async fn requester_outside_voice_creates_no_session() {
        let h = Harness::new(FakeBackend::reachable());
        {
            let mut slot = h.manager.lock_guild(guild()).await;
            let result = h.manager.ensure_voice_connection(&mut slot, None).await;
            assert!(matches!(result, Err(SessionError::NotInVoiceChannel)));
        }
        assert!(!h.sessions.contains(guild()).await);
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn failed_join_is_a_connect_error() {
        let gateway = FakeGateway {
            refuse_join: true,
            ..Default::default()
        };
        let h = Harness::with_gateway(gateway, FakeBackend::reachable());
        let mut slot = h.manager.lock_guild(guild()).await;

        let result = h.manager.ensure_voice_connection(&mut slot, Some(voice())).await;

        assert!(matches!(result, Err(SessionError::ConnectError(_))));
        assert!(slot.session().is_none());
    }

    #[tokio::test]
    async fn literal_url_resolves_without_search() {
        let h = Harness::new(FakeBackend::reachable().answer(URL, Ok(Some(track("Song", URL)))));

        let track = h.manager.resolve_query(URL).await.unwrap();

        assert_eq!(track.locator.url(), URL);
        assert_eq!(h.backend.lookups(), vec![URL]);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_search_once() {
        let backend = FakeBackend::reachable()
            .answer("ytsearch:lofi beats", Ok(Some(track("Lofi", URL))));
        let h = Harness::new(backend);

        let track = h.manager.resolve_query("lofi beats").await.unwrap();

        assert_eq!(track.title, "Lofi");
        assert_eq!(h.backend.lookups(), vec!["lofi beats", "ytsearch:lofi beats"]);
    }

    #[tokio::test]
    async fn unresolvable_query_fails_after_one_fallback() {
        let h = Harness::new(FakeBackend::reachable());

        let result = h.manager.resolve_query("zzzz").await;

        assert!(matches!(result, Err(SessionError::ExtractionError(_))));
        assert_eq!(h.backend.lookups(), vec!["zzzz", "ytsearch:zzzz"]);
    }

    #[tokio::test]
    async fn fallback_with_no_candidates_is_no_results() {
        let backend = FakeBackend::reachable().answer("ytsearch:zzzz", Ok(None));
        let h = Harness::new(backend);

        let result = h.manager.resolve_query("zzzz").await;

        assert!(matches!(result, Err(SessionError::NoResultsError { .. })));
        assert_eq!(h.backend.lookups().len(), 2);
    }

    #[tokio::test]
    async fn empty_result_is_not_retried() {
        let h = Harness::new(FakeBackend::reachable().answer("nothing", Ok(None)));

        let result = h.manager.resolve_query("nothing").await;

        assert!(matches!(result, Err(SessionError::NoResultsError { .. })));
        assert_eq!(h.backend.lookups(), vec!["nothing"]);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_fast() {
        let h = Harness::new(FakeBackend::default());

        let result = h.manager.resolve_query("anything").await;

        assert!(matches!(
            result,
            Err(SessionError::BackendUnavailable { .. })
        ));
        assert!(h.backend.lookups().is_empty());
    }

    #[tokio::test]
    async fn new_track_preempts_the_playing_one() {
        let h = Harness::new(FakeBackend::reachable());
        let mut slot = h.manager.lock_guild(guild()).await;
        let (session, _) = h
            .manager
            .ensure_voice_connection(&mut slot, Some(voice()))
            .await
            .unwrap();

        h.manager.start_playback(session, &track("First", URL)).await.unwrap();
        h.manager.start_playback(session, &track("Second", URL)).await.unwrap();

        assert_eq!(session.current_track_title.as_deref(), Some("Second"));
        assert_eq!(
            h.events(),
            vec!["join 1 10", "play First", "stop First", "play Second"]
        );
    }

    #[tokio::test]
    async fn pause_and_resume_follow_the_source_state() {
        let h = Harness::new(FakeBackend::reachable());
        let mut slot = h.manager.lock_guild(guild()).await;

        assert!(matches!(h.manager.pause(&mut slot).await, Err(SessionError::NoSession)));

        let (session, _) = h
            .manager
            .ensure_voice_connection(&mut slot, Some(voice()))
            .await
            .unwrap();
        h.manager.start_playback(session, &track("Song", URL)).await.unwrap();

        assert!(matches!(h.manager.resume(&mut slot).await, Err(SessionError::NothingPaused)));
        assert_eq!(h.manager.pause(&mut slot).await.unwrap().as_deref(), Some("Song"));
        assert!(matches!(h.manager.pause(&mut slot).await, Err(SessionError::NothingPlaying)));
        h.manager.resume(&mut slot).await.unwrap();

        h.manager.stop(&mut slot).await.unwrap();
        assert!(matches!(h.manager.pause(&mut slot).await, Err(SessionError::NothingPlaying)));
        assert!(slot.session().unwrap().current_track_title.is_none());
    }

    #[tokio::test]
    async fn leave_destroys_the_session() {
        let h = Harness::new(FakeBackend::reachable());
        {
            let mut slot = h.manager.lock_guild(guild()).await;
            let (session, _) = h
                .manager
                .ensure_voice_connection(&mut slot, Some(voice()))
                .await
                .unwrap();
            h.manager.start_playback(session, &track("Song", URL)).await.unwrap();
            h.manager.leave(&mut slot).await.unwrap();
            assert!(matches!(h.manager.leave(&mut slot).await, Err(SessionError::NoSession)));
        }
        assert!(!h.sessions.contains(guild()).await);
        assert_eq!(
            h.events(),
            vec!["join 1 10", "play Song", "stop Song", "leave 1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_releases_the_guild() {
        let backend = FakeBackend {
            stall_lookups: true,
            ..FakeBackend::reachable()
        };
        let h = Harness::new(backend);
        let start = Instant::now();

        let result = h.manager.resolve_query("lofi beats").await;

        assert!(matches!(result, Err(SessionError::ExtractionError(_))));
        assert_eq!(start.elapsed(), DEFAULT_BACKEND_TIMEOUT);
        // Unreachable, so no search fallback and the link re-probes next time.
        assert_eq!(h.backend.lookups(), vec!["lofi beats"]);
        assert_eq!(h.manager.link().status(), NodeStatus::Disconnected);
    }

    fn text_channel() -> ChannelId {
        ChannelId::new(7)
    }

    #[tokio::test(start_paused = true)]
    async fn reply_to_the_prompt_is_played() {
        let backend = FakeBackend::reachable()
            .answer("lofi beats", Ok(Some(track("Lofi Beats", URL))));
        let h = Harness::new(backend);
        let mut slot = h.manager.lock_guild(guild()).await;
        h.manager
            .ensure_voice_connection(&mut slot, Some(voice()))
            .await
            .unwrap();

        // The answer shows up a while after the prompt, among other chatter.
        let messages = stream::iter(vec![msg(9, 7, "hi"), msg(5, 7, "lofi beats")])
            .then(|m| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                m
            });

        let (track, reply) = h
            .manager
            .play_from_reply(
                &mut slot,
                messages,
                UserId::new(5),
                text_channel(),
                DEFAULT_REPLY_TIMEOUT,
            )
            .await
            .unwrap();

        assert_eq!(track.title, "Lofi Beats");
        assert_eq!(reply.text, "lofi beats");
        assert_eq!(
            slot.session().unwrap().current_track_title.as_deref(),
            Some("Lofi Beats")
        );
        assert_eq!(h.events(), vec!["join 1 10", "play Lofi Beats"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_prompt_plays_nothing() {
        let h = Harness::new(FakeBackend::reachable());
        let mut slot = h.manager.lock_guild(guild()).await;
        h.manager
            .ensure_voice_connection(&mut slot, Some(voice()))
            .await
            .unwrap();
        let start = Instant::now();

        let result = h
            .manager
            .play_from_reply(
                &mut slot,
                stream::pending::<Msg>(),
                UserId::new(5),
                text_channel(),
                DEFAULT_REPLY_TIMEOUT,
            )
            .await;

        assert!(matches!(result, Err(SessionError::TimeoutError { .. })));
        assert_eq!(start.elapsed(), DEFAULT_REPLY_TIMEOUT);
        assert!(h.backend.lookups().is_empty());
        assert_eq!(h.events(), vec!["join 1 10"]);
        assert!(slot.session().unwrap().current.is_none());
    }
}
