use crate::data::GetData;
use crate::Context;
use crate::EncoreError;

/// Check that the bot is alive and whether the audio backend is reachable.
#[poise::command(prefix_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), EncoreError> {
    let latency = ctx.ping().await;
    let backend = ctx.playback().link().status();

    // Zero until the first heartbeat is acknowledged.
    let reply = if latency.is_zero() {
        format!("Pong! Backend: {backend:?}")
    } else {
        format!("Pong! ({} ms) Backend: {backend:?}", latency.as_millis())
    };
    ctx.say(reply).await?;
    Ok(())
}
