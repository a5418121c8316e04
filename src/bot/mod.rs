//! Bot module for handling Telegram interactions
//!
//! - `commands`: command table, parsing and the store-backed dispatcher
//! - `message_handler`: teloxide endpoint wiring messages to the dispatcher
//! - `formatting`: reply and alert text

pub mod commands;
pub mod formatting;
pub mod message_handler;

use teloxide::types::BotCommand;

pub use commands::{parse_input, Command, CommandDispatcher, Input, COMMANDS};
pub use message_handler::message_handler;

/// Commands shown in Telegram's "/" menu
pub fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("add", "Track an Amazon India product link"),
        BotCommand::new("list", "Show your tracked products"),
        BotCommand::new("status", "Show the status of a product"),
        BotCommand::new("remove", "Stop tracking a product"),
        BotCommand::new("help", "Show help"),
    ]
}
