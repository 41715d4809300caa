//! Implements the `join` command.

use tracing::instrument;

use crate::data::GetData;
use crate::lib::call;
use crate::playback::JoinOutcome;
use crate::Context;
use crate::EncoreError;

/// Join (or move to) your voice channel.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn join(ctx: Context<'_>) -> Result<(), EncoreError> {
    let (_, channel) = call::author_voice_channel(&ctx)?;
    let mut slot = ctx.guild_slot().await?;

    let (_, outcome) = ctx
        .playback()
        .ensure_voice_connection(&mut slot, channel)
        .await?;

    let reply = match outcome {
        JoinOutcome::Joined => "Joined your voice channel.",
        JoinOutcome::Moved => "Moved to your voice channel.",
        JoinOutcome::Stayed => "Already here.",
    };
    ctx.reply(reply).await?;
    Ok(())
}
