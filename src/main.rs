//! A Discord music bot that plays one track at a time per guild.

mod commands;
mod data;
mod error;
mod lib;
mod log;
mod playback;
mod setup;

pub use poise::serenity_prelude as serenity;

pub use data::Data;
pub use error::EncoreError;
pub use setup::Config;

/// Convenient type alias for [poise::Context].
pub type Context<'a> = poise::Context<'a, Data, EncoreError>;

#[tokio::main]
async fn main() -> Result<(), EncoreError> {
    // Load before config so `.env` values act as environment variables.
    dotenvy::dotenv().ok();

    let config = Config::read();
    // Keep the guard alive, otherwise file logs stop.
    let _guard = log::install_tracing(&config);
    for problem in config.problems() {
        tracing::warn!("{problem}");
    }

    if let Err(e) = config.token() {
        tracing::error!("Cannot start: {e}");
        return Err(e.into());
    }

    if let Some(port) = config.keepalive_port() {
        setup::keepalive::spawn(port);
    }

    let mut client = setup::client(config).await?;
    client.start().await?;

    Ok(())
}
