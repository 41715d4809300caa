//! Defines and implements custom bot functionality.

mod config;
mod framework;
pub mod keepalive;

use std::sync::Arc;

use songbird::SerenityInit;

use crate::data::SessionRegistry;
use crate::lib::call::SongbirdGateway;
use crate::lib::relay::RelayNode;
use crate::lib::youtube::YtDlp;
use crate::playback::{AudioBackend, BackendLink, PlaybackManager};
use crate::serenity;
use crate::EncoreError;

pub use config::{BackendKind, BackendNodeConfig, Config};

/// Constructs a [serenity::Client] with initialized [songbird] and the [PlaybackManager].
///
/// Also starts connecting to the audio backend in the background. This is the
/// only place the startup connect happens.
pub(super) async fn client(config: Config) -> Result<serenity::Client, EncoreError> {
    // Get discord token from config
    let token = config.token()?.clone();

    // Intents we wish to use
    // See https://discord.com/developers/docs/topics/gateway#gateway-intents
    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::MESSAGE_CONTENT;

    // Only connecting is bounded here, audio streams share this client.
    let http = reqwest::Client::builder()
        .connect_timeout(config.backend().call_timeout())
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to a default http client: {e}");
            reqwest::Client::new()
        });
    let voice = songbird::Songbird::serenity();
    let sessions = SessionRegistry::default();

    let gateway = SongbirdGateway::new(voice.clone(), http.clone(), sessions.clone());
    let link = BackendLink::new(audio_backend(config.backend(), http))
        .with_timeout(config.backend().call_timeout());
    let link = Arc::new(link);
    let playback = Arc::new(PlaybackManager::new(
        Arc::new(gateway),
        link.clone(),
        sessions,
    ));

    let policy = config.backend().retry_policy();
    tokio::spawn(async move {
        // The bot keeps running without a backend.
        if let Err(e) = link.connect_with_retry(policy).await {
            tracing::debug!("Startup connect gave up: {e}");
        }
    });

    let client = serenity::ClientBuilder::new(token, intents)
        .framework(framework::framework(config, playback))
        .register_songbird_with(voice)
        .await?;

    Ok(client)
}

/// Build the configured backend. `None` if it lacks what it needs.
fn audio_backend(
    config: &BackendNodeConfig,
    http: reqwest::Client,
) -> Option<Arc<dyn AudioBackend>> {
    if let Some(reason) = &config.invalid {
        tracing::warn!("Audio backend disabled: {reason}");
        return None;
    }
    match config.kind {
        BackendKind::Ytdlp => Some(Arc::new(YtDlp::new(config.ytdlp_path.clone()))),
        BackendKind::Relay => {
            let Some(host) = config.host.as_deref() else {
                tracing::warn!("Relay backend selected but no host is set.");
                return None;
            };
            match RelayNode::new(http, host, config.port, &config.password, config.secure) {
                Ok(node) => Some(Arc::new(node)),
                Err(e) => {
                    tracing::warn!("Invalid relay address: {e}");
                    None
                }
            }
        }
    }
}
