//! Waiting for a user to answer a prompt.

use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::SessionError;
use crate::serenity::{self, ChannelId, UserId};

/// How long a user has to answer before the request is dropped.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// The parts of a chat message needed to match a reply.
pub trait IncomingMessage {
    fn author_id(&self) -> UserId;
    fn channel_id(&self) -> ChannelId;
    fn text(&self) -> &str;
}

impl IncomingMessage for serenity::Message {
    fn author_id(&self) -> UserId {
        self.author.id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn text(&self) -> &str {
        &self.content
    }
}

/// Wait for the first message from `requester` in `channel` with some text in it.
///
/// Only this invocation waits. Gives up with [SessionError::TimeoutError] once
/// `deadline` has passed.
pub async fn await_query_from_user<S>(
    messages: S,
    requester: UserId,
    channel: ChannelId,
    deadline: Duration,
) -> Result<S::Item, SessionError>
where
    S: Stream,
    S::Item: IncomingMessage,
{
    let replies = messages.filter(|msg| {
        let matches = msg.author_id() == requester
            && msg.channel_id() == channel
            && !msg.text().trim().is_empty();
        futures::future::ready(matches)
    });
    let mut replies = std::pin::pin!(replies);

    match tokio::time::timeout(deadline, replies.next()).await {
        Ok(Some(reply)) => Ok(reply),
        // A closed stream can never produce the reply, same as running out of time.
        Ok(None) | Err(_) => Err(SessionError::TimeoutError { waited: deadline }),
    }
}
