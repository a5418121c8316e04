//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, Instrument};

use crate::errors::error_logging;
use crate::observability;

use super::commands::CommandDispatcher;

/// Teloxide endpoint for text messages.
///
/// The chat id is the owner of every product added from that chat.
pub async fn message_handler(bot: Bot, msg: Message, dispatcher: Arc<CommandDispatcher>) -> Result<()> {
    let Some(text) = msg.text() else {
        debug!(chat_id = %msg.chat.id, "Ignoring non-text message");
        return Ok(());
    };

    let chat_id = msg.chat.id;
    let span = observability::telegram_span("message", chat_id.0);

    let reply = dispatcher.dispatch(chat_id.0, text).instrument(span).await;

    if let Some(reply) = reply {
        if let Err(e) = bot.send_message(chat_id, reply).await {
            error_logging::log_telegram_error(&e, "send_reply", chat_id.0);
        }
    }

    Ok(())
}
