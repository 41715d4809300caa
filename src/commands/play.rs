//! Implements the `play` command.
//!
//! Joins the author's voice channel, resolves the query into a track and
//! replaces whatever was playing. Without a query the bot asks for one and
//! waits for the author's next message in the same channel.

use poise::CreateReply;
use tracing::instrument;

use crate::data::GetData;
use crate::data::GuildSlot;
use crate::lib::call;
use crate::playback::Track;
use crate::serenity;
use crate::Context;
use crate::EncoreError;

/// Play a song from a link or search terms.
#[instrument(skip(ctx))]
#[poise::command(prefix_command, guild_only)]
pub async fn play(
    ctx: Context<'_>,
    #[rest]
    #[description = "A link or search terms"]
    query: Option<String>,
) -> Result<(), EncoreError> {
    // Checked before anything else so nothing is left half done.
    let (_, channel) = call::author_voice_channel(&ctx)?;

    let mut slot = ctx.guild_slot().await?;
    ctx.playback()
        .ensure_voice_connection(&mut slot, channel)
        .await?;

    let track = match query.map(|q| q.trim().to_string()) {
        Some(query) if !query.is_empty() => play_given(ctx, &mut slot, &query).await?,
        _ => play_answer(ctx, &mut slot).await?,
    };

    // Only a courtesy, users may have DMs closed.
    let dm = serenity::CreateMessage::new().content(format!("Now playing: **{track}**"));
    if let Err(e) = ctx.author().direct_message(ctx, dm).await {
        tracing::debug!("Could not DM {}: {e}", ctx.author().name);
    }

    Ok(())
}

/// Play a query given with the command.
async fn play_given(
    ctx: Context<'_>,
    slot: &mut GuildSlot,
    query: &str,
) -> Result<Track, EncoreError> {
    let searching = ctx.say(format!("Searching for `{query}`...")).await?;
    let track = ctx.playback().play_query(slot, query).await?;

    let now_playing = CreateReply::default().content(format!("Now playing: **{track}**"));
    searching.edit(ctx, now_playing).await?;
    Ok(track)
}

/// Prompt the author and play whatever they answer with.
///
/// Both the prompt and the answer are removed afterwards when the bot is allowed to.
async fn play_answer(ctx: Context<'_>, slot: &mut GuildSlot) -> Result<Track, EncoreError> {
    let timeout = ctx.data().reply_timeout;
    let author = ctx.author().id;
    let channel = ctx.channel_id();

    // Listen before asking so a quick answer isn't missed.
    let messages = serenity::MessageCollector::new(&ctx.serenity_context().shard)
        .author_id(author)
        .channel_id(channel)
        .stream();

    let prompt = ctx
        .say(format!(
            "What should I play? Send a link or search terms within {} seconds.",
            timeout.as_secs()
        ))
        .await?;

    let played = ctx
        .playback()
        .play_from_reply(slot, messages, author, channel, timeout)
        .await;

    if let Err(e) = prompt.delete(ctx).await {
        tracing::debug!("Could not delete prompt: {e}");
    }
    let (track, answer) = played?;
    if let Err(e) = answer.delete(ctx).await {
        tracing::debug!("Could not delete answer: {e}");
    }

    ctx.say(format!("Now playing: **{track}**")).await?;
    Ok(track)
}
