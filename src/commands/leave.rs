//! Implements the `leave` command.
//!
//! Stops playback, disconnects from voice and forgets the guild's session.

use tracing::instrument;

use crate::data::GetData;
use crate::Context;
use crate::EncoreError;

/// Leave the voice channel.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn leave(ctx: Context<'_>) -> Result<(), EncoreError> {
    let mut slot = ctx.guild_slot().await?;
    ctx.playback().leave(&mut slot).await?;
    ctx.reply("Left the voice channel.").await?;
    Ok(())
}
