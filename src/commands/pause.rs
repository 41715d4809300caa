//! Implements the `pause` and `resume` commands.

use tracing::instrument;

use crate::data::GetData;
use crate::Context;
use crate::EncoreError;

/// Pause the current track.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn pause(ctx: Context<'_>) -> Result<(), EncoreError> {
    let mut slot = ctx.guild_slot().await?;
    let title = ctx.playback().pause(&mut slot).await?;
    ctx.reply(with_title("Paused", title)).await?;
    Ok(())
}

/// Resume the paused track.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn resume(ctx: Context<'_>) -> Result<(), EncoreError> {
    let mut slot = ctx.guild_slot().await?;
    let title = ctx.playback().resume(&mut slot).await?;
    ctx.reply(with_title("Resumed", title)).await?;
    Ok(())
}

fn with_title(action: &str, title: Option<String>) -> String {
    match title {
        Some(title) => format!("{action} `{title}`."),
        None => format!("{action}."),
    }
}
