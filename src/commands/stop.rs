//! Implements the `stop` command.
//!
//! This ends the current track but keeps the bot in the voice channel.

use tracing::instrument;

use crate::data::GetData;
use crate::Context;
use crate::EncoreError;

/// Stop playing.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), EncoreError> {
    let mut slot = ctx.guild_slot().await?;

    tracing::info!("Stopping playback.");
    ctx.playback().stop(&mut slot).await?;
    ctx.reply("Stopped.").await?;
    Ok(())
}
