//! Telegram update routing.
//!
//! Each handler converts the update into domain types, calls the service and
//! logs the result. Handlers always return `Ok` so one failed update never
//! stops the dispatcher.

use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::types::{CallbackQuery, Message, Update, User};
use tracing::{debug, warn};
use warden_common::{ChatId, GateError, Member, MessageRef, UserId};

use crate::gate::TextOutcome;
use crate::moderation::{Command, CommandContext};
use crate::platform::{CallbackAction, TextMessage};
use crate::state::AppState;

pub fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(on_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::filter(|msg: Message| msg.new_chat_members().is_some())
                        .endpoint(on_new_members),
                )
                .branch(dptree::entry().filter_command::<Command>().endpoint(on_command))
                .branch(
                    dptree::filter(|msg: Message| msg.chat.is_group() || msg.chat.is_supergroup())
                        .endpoint(on_group_message),
                ),
        )
}

fn member_of(user: &User) -> Member {
    Member {
        id: UserId(user.id.0 as i64),
        name: user.full_name(),
        username: user.username.clone(),
        is_bot: user.is_bot,
    }
}

fn chat_of(msg: &Message) -> ChatId {
    ChatId(msg.chat.id.0)
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef::new(chat_of(msg), msg.id.0)
}

fn log_gate_error(error: &GateError, what: &'static str) {
    if error.is_benign() {
        debug!(error = %error, what, "Gate event ended early");
    } else {
        warn!(error = %error, what, "Gate event failed");
    }
}

async fn on_new_members(state: AppState, msg: Message) -> anyhow::Result<()> {
    let chat = chat_of(&msg);

    for user in msg.new_chat_members().unwrap_or(&[]) {
        if let Err(e) = state.gate.on_member_joined(chat, &member_of(user)).await {
            log_gate_error(&e, "join");
        }
    }

    Ok(())
}

async fn on_callback(state: AppState, query: CallbackQuery) -> anyhow::Result<()> {
    let action = CallbackAction {
        member: member_of(&query.from),
        callback_id: query.id.clone(),
        payload: query.data.clone().unwrap_or_default(),
        origin: query
            .message
            .as_ref()
            .map(|m| MessageRef::new(ChatId(m.chat().id.0), m.id().0)),
    };

    if let Err(e) = state.gate.on_callback(&action).await {
        log_gate_error(&e, "callback");
    }

    Ok(())
}

async fn on_command(state: AppState, msg: Message, command: Command) -> anyhow::Result<()> {
    let Some(sender) = msg.from.as_ref() else {
        return Ok(());
    };

    // A pending member's text belongs to the gate, commands included
    if !msg.chat.is_private() && screen_text(&state, &msg, sender).await != TextOutcome::NotPending
    {
        return Ok(());
    }

    let ctx = CommandContext {
        chat: chat_of(&msg),
        chat_is_private: msg.chat.is_private(),
        sender: member_of(sender),
        message: message_ref(&msg),
        reply_target: msg
            .reply_to_message()
            .and_then(|reply| reply.from.as_ref())
            .map(member_of),
    };

    if let Err(e) = state.moderator.execute(&ctx, command).await {
        warn!(chat_id = %ctx.chat, user_id = %ctx.sender.id, error = %e, "Command failed");
    }

    Ok(())
}

async fn on_group_message(state: AppState, msg: Message) -> anyhow::Result<()> {
    let Some(sender) = msg.from.as_ref() else {
        return Ok(());
    };

    if screen_text(&state, &msg, sender).await != TextOutcome::NotPending {
        return Ok(());
    }

    let user = UserId(sender.id.0 as i64);
    if let Err(e) = state.mutes.filter_message(user, message_ref(&msg)).await {
        warn!(chat_id = %chat_of(&msg), user_id = %user, error = %e, "Mute check failed");
    }

    Ok(())
}

/// Offer a group message to the gate. Errors count as handled.
async fn screen_text(state: &AppState, msg: &Message, sender: &User) -> TextOutcome {
    let Some(text) = msg.text() else {
        return TextOutcome::NotPending;
    };

    let message = TextMessage {
        member: member_of(sender),
        chat: chat_of(msg),
        text: text.to_string(),
        message: message_ref(msg),
    };

    match state.gate.on_group_text(&message).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_gate_error(&e, "text");
            TextOutcome::Discarded
        }
    }
}
