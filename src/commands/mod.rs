//! Bot commands.

mod join;
mod leave;
mod pause;
mod ping;
mod play;
mod stop;

use crate::{Data, EncoreError};

/// Convenient type alias for [poise::Command].
pub type Command = poise::Command<Data, EncoreError>;

/// Lists all the implemented commands
pub fn list() -> Vec<Command> {
    vec![
        join::join(),
        leave::leave(),
        play::play(),
        stop::stop(),
        pause::pause(),
        pause::resume(),
        ping::ping(),
    ]
}
