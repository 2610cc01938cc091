//! Timed mutes and moderator commands.

mod commands;
mod mute;

pub use commands::{Command, CommandContext, Moderator};
pub use mute::MuteService;
