//! Setup for [poise::Framework]

use std::sync::Arc;

use itertools::Itertools;

use crate::commands;
use crate::playback::PlaybackManager;
use crate::serenity;
use crate::Config;
use crate::Data;
use crate::EncoreError;

/// Convenient type alias, only this [poise::Framework] type is used.
type Framework = poise::Framework<Data, EncoreError>;

/// Construct a [poise::Framework]
pub(super) fn framework(config: Config, playback: Arc<PlaybackManager>) -> Framework {
    poise::Framework::builder()
        .options(framework_options(&config))
        .setup(move |ctx, rdy, fw| framework_setup(ctx, rdy, fw, config, playback))
        .build()
}

/// Configure options for the [Framework]
fn framework_options(config: &Config) -> poise::FrameworkOptions<Data, EncoreError> {
    poise::FrameworkOptions {
        // Add commands to the framework
        commands: commands::list(),
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some(config.prefix().to_string()),
            ..Default::default()
        },
        // Handle framework errors
        on_error: |e| crate::log::handle_framework_error(e),
        // Log when commands start
        pre_command: |ctx| {
            Box::pin(async move {
                let cmd_name = &ctx.command().name;
                let user = &ctx.author().name;
                tracing::info!("Started '{cmd_name}' command from {user}.")
            })
        },
        // Log when finishing commands
        post_command: |ctx| {
            Box::pin(async move {
                let cmd_name = &ctx.command().name;
                let user = &ctx.author().name;
                tracing::info!("Finished '{cmd_name}' command from {user}.")
            })
        },
        ..Default::default()
    }
}

/// Construct future that runs on startup
fn framework_setup<'a>(
    _ctx: &'a serenity::Context,
    rdy: &'a serenity::Ready,
    fw: &'a Framework,
    config: Config,
    playback: Arc<PlaybackManager>,
) -> poise::BoxFuture<'a, Result<Data, EncoreError>> {
    Box::pin(async move {
        // Simple message that logs when the bot has initialized
        let bot_name = &rdy.user.name;
        let prefix = config.prefix();
        let commands = fw
            .options()
            .commands
            .iter()
            .map(|c| format!("{prefix}{}", c.name))
            .join(", ");
        tracing::info!("{bot_name} is ready! Commands: {commands}");

        let data = Data {
            notify_list: config.notify_list(fw),
            playback,
            reply_timeout: config.reply_timeout(),
        };

        Ok(data)
    })
}
