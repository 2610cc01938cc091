//! Join gate state machine.
//!
//! A joining member is restricted, challenged, and then either admitted or
//! removed. Every terminal transition starts with [`Store::delete_pending`]:
//! only the caller that actually removed the record goes on to touch the
//! member, so a timer racing an answer (or two answers racing each other)
//! can never both act.

mod callback;
mod delivery;

pub use callback::CallbackPayload;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use warden_common::{
    Challenge, ChatId, DeliveryMode, GateError, GateOutcome, Member, MessageRef, OutcomeKind,
    PendingChallenge, PermissionSet, RemovalReason, UserId,
};

use crate::captcha::{ChallengeGenerator, parse_numeric_answer, verify};
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::platform::{CallbackAction, Platform, TextMessage};
use crate::scheduler::{Scheduler, SweepReport, TaskKey, delay_until};
use crate::store::Store;

/// What the gate did with a group message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    /// Sender has no pending challenge, the message is not the gate's business
    NotPending,
    /// Sender is pending but the message is not an answer, it was deleted
    Discarded,
    /// Message was evaluated as an answer and admitted the sender
    Answered,
}

#[derive(Clone)]
pub struct Gate {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    config: ConfigHandle,
    generator: ChallengeGenerator,
    outcomes: broadcast::Sender<GateOutcome>,
    bot_username: Arc<str>,
}

impl Gate {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn Platform>,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
        config: ConfigHandle,
        outcomes: broadcast::Sender<GateOutcome>,
        bot_username: &str,
    ) -> Self {
        Self {
            store,
            platform,
            scheduler,
            clock,
            config,
            generator: ChallengeGenerator::default(),
            outcomes,
            bot_username: Arc::from(bot_username),
        }
    }

    /// Restrict and challenge a new member
    pub async fn on_member_joined(&self, chat: ChatId, member: &Member) -> Result<(), GateError> {
        if member.is_bot {
            debug!(chat_id = %chat, user_id = %member.id, "Bot joined, not gated");
            return Ok(());
        }

        let config = self.config.current().await;
        let gate = &config.gate;
        let mode = gate.delivery_mode;

        self.platform
            .restrict(chat, member.id, mode.pending_permissions())
            .await?;

        let previous = self.store.get_pending(member.id, chat).await?;

        let (challenge, _) = self.generator.generate();
        let expires_at = self.clock.now() + gate.timeout();
        let record = PendingChallenge::new(chat, member, challenge, expires_at, mode);
        self.store.upsert_pending(&record).await?;

        // Rejoin while pending: the old prompt belongs to a dead challenge
        if let Some(prompt) = previous.and_then(|p| p.prompt) {
            self.cleanup_prompt(chat, prompt, delivery::ENDED_TOAST).await;
        }

        let prompt = match mode {
            DeliveryMode::Private => {
                let sent = self
                    .platform
                    .send_message(
                        member.id.private_chat(),
                        &delivery::private_prompt(gate.timeout_secs),
                        Some(delivery::reveal_keyboard(chat, challenge)),
                    )
                    .await;

                match sent {
                    Ok(prompt) => prompt,
                    Err(e) => {
                        warn!(
                            chat_id = %chat,
                            user_id = %member.id,
                            error = %e,
                            "Private challenge could not be delivered"
                        );
                        self.remove(&record, RemovalReason::Undeliverable).await?;
                        return Ok(());
                    }
                }
            }
            DeliveryMode::InChat => {
                let sent = self
                    .platform
                    .send_message(
                        chat,
                        &delivery::in_chat_prompt(member, &challenge, gate.timeout_secs),
                        None,
                    )
                    .await;

                match sent {
                    Ok(prompt) => prompt,
                    Err(e) => {
                        // Member stays restricted, the timer removes them
                        warn!(chat_id = %chat, user_id = %member.id, error = %e, "Failed to post challenge");
                        self.arm_expiry(chat, member.id, expires_at);
                        return Err(e.into());
                    }
                }
            }
        };

        if !self.store.attach_prompt(member.id, chat, prompt).await? {
            debug!(chat_id = %chat, user_id = %member.id, "Resolved before the prompt was attached");
            self.cleanup_prompt(chat, prompt, delivery::ENDED_TOAST).await;
        }

        self.arm_expiry(chat, member.id, expires_at);

        info!(
            chat_id = %chat,
            user_id = %member.id,
            mode = mode.as_str(),
            challenge = %challenge,
            "Member challenged"
        );
        self.emit(chat, member.id, OutcomeKind::Challenged { mode });

        Ok(())
    }

    /// Handle an inline button press, always acknowledging the callback
    pub async fn on_callback(&self, action: &CallbackAction) -> Result<(), GateError> {
        let payload = match action.payload.parse::<CallbackPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(payload = %action.payload, error = %e, "Malformed callback payload");
                self.acknowledge(&action.callback_id, Some(delivery::INVALID_BUTTON_TOAST))
                    .await;
                return Ok(());
            }
        };

        let user = action.member.id;
        match payload {
            CallbackPayload::Reveal { chat, challenge } => {
                let result = self.reveal(chat, user, challenge, action.origin).await;
                let toast = result.as_ref().err().map(toast_for);
                self.acknowledge(&action.callback_id, toast.as_deref()).await;
                result
            }
            CallbackPayload::Answer {
                chat,
                challenge,
                value,
            } => {
                let result = self.submit_answer(chat, user, value, Some(challenge)).await;
                let toast = match &result {
                    Ok(()) => delivery::VERIFIED_TOAST.to_string(),
                    Err(e) => toast_for(e),
                };
                self.acknowledge(&action.callback_id, Some(&toast)).await;
                result
            }
        }
    }

    /// Screen a group message from a possibly pending member
    pub async fn on_group_text(&self, message: &TextMessage) -> Result<TextOutcome, GateError> {
        let user = message.member.id;
        let Some(record) = self.store.get_pending(user, message.chat).await? else {
            return Ok(TextOutcome::NotPending);
        };

        // Answer by the mode the challenge was issued under, not the current one
        let config = self.config.current().await;
        let answer = match record.mode {
            DeliveryMode::InChat => parse_numeric_answer(&message.text),
            DeliveryMode::Private => None,
        };

        let Some(answer) = answer else {
            self.discard(message.message).await;
            return Ok(TextOutcome::Discarded);
        };

        let result = self.submit_answer(message.chat, user, answer, None).await;
        self.discard(message.message).await;

        if let Err(GateError::Mismatch { remaining }) = &result {
            self.post_notice(
                message.chat,
                &delivery::wrong_answer_warning(&message.member, *remaining),
                config.gate.warning_delete_after_secs,
            )
            .await;
        }

        result.map(|()| TextOutcome::Answered)
    }

    /// Evaluate an answer. `expected` pins the challenge the answer was given
    /// for; an answer to a superseded challenge is treated as unknown.
    pub async fn submit_answer(
        &self,
        chat: ChatId,
        user: UserId,
        answer: i64,
        expected: Option<Challenge>,
    ) -> Result<(), GateError> {
        let record = self
            .store
            .get_pending(user, chat)
            .await?
            .filter(|r| expected.is_none_or(|c| c == r.challenge))
            .ok_or(GateError::NotFound)?;

        if record.is_expired_at(self.clock.now()) {
            self.remove(&record, RemovalReason::Timeout).await?;
            return Err(GateError::Expired);
        }

        if verify(&record.challenge, answer) {
            return self.admit(&record).await;
        }

        let attempts = self
            .store
            .increment_attempts(user, chat)
            .await?
            .ok_or(GateError::NotFound)?;
        let max_attempts = self.config.current().await.gate.max_attempts;

        debug!(chat_id = %chat, user_id = %user, attempts, "Wrong answer");

        if attempts >= max_attempts {
            self.remove(&record, RemovalReason::Lockout).await?;
            return Err(GateError::Lockout);
        }

        Err(GateError::Mismatch {
            remaining: max_attempts - attempts,
        })
    }

    /// Timer entry point: remove the member if their challenge is still
    /// pending and past its deadline
    pub async fn expire(&self, chat: ChatId, user: UserId) -> Result<(), GateError> {
        let Some(record) = self.store.get_pending(user, chat).await? else {
            debug!(chat_id = %chat, user_id = %user, "Expiry fired for resolved challenge");
            return Ok(());
        };

        if !record.is_expired_at(self.clock.now()) {
            debug!(chat_id = %chat, user_id = %user, "Expiry fired for superseded challenge");
            return Ok(());
        }

        self.remove(&record, RemovalReason::Timeout).await?;
        Ok(())
    }

    /// Expire overdue challenges and re-arm timers lost to a restart
    pub async fn sweep(&self) -> Result<SweepReport, GateError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for record in self.store.list_pending().await? {
            let key = TaskKey::challenge(record.chat_id, record.user_id);

            if record.is_expired_at(now) {
                match self.remove(&record, RemovalReason::Timeout).await {
                    Ok(true) => report.expired += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        chat_id = %record.chat_id,
                        user_id = %record.user_id,
                        error = %e,
                        "Failed to expire overdue challenge"
                    ),
                }
            } else if !self.scheduler.is_armed(key) {
                self.arm_expiry(record.chat_id, record.user_id, record.expires_at);
                report.rearmed += 1;
            }
        }

        Ok(report)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateOutcome> {
        self.outcomes.subscribe()
    }

    async fn reveal(
        &self,
        chat: ChatId,
        user: UserId,
        challenge: Challenge,
        origin: Option<MessageRef>,
    ) -> Result<(), GateError> {
        let record = self
            .store
            .get_pending(user, chat)
            .await?
            .filter(|r| r.challenge == challenge)
            .ok_or(GateError::NotFound)?;

        if record.is_expired_at(self.clock.now()) {
            self.remove(&record, RemovalReason::Timeout).await?;
            return Err(GateError::Expired);
        }

        let target = origin.or(record.prompt).ok_or(GateError::NotFound)?;
        let max_attempts = self.config.current().await.gate.max_attempts;

        self.platform
            .edit_message(
                target,
                &delivery::revealed_question(&challenge, record.remaining_attempts(max_attempts)),
                Some(delivery::answer_keyboard(chat, challenge)),
            )
            .await?;

        Ok(())
    }

    async fn admit(&self, record: &PendingChallenge) -> Result<(), GateError> {
        let (chat, user) = (record.chat_id, record.user_id);

        if !self.store.delete_pending(user, chat).await? {
            debug!(chat_id = %chat, user_id = %user, "Lost resolution race, not admitting");
            return Err(GateError::NotFound);
        }
        self.scheduler.cancel(TaskKey::challenge(chat, user));

        if let Err(e) = self.platform.restrict(chat, user, PermissionSet::Member).await {
            warn!(chat_id = %chat, user_id = %user, error = %e, "Failed to lift restriction");
        }

        if let Some(prompt) = record.prompt {
            self.cleanup_prompt(chat, prompt, delivery::VERIFIED_STATUS).await;
        }

        let config = self.config.current().await;
        self.post_notice(
            chat,
            &delivery::welcome(&config.gate.welcome_message, &record.member_name),
            config.gate.welcome_delete_after_secs,
        )
        .await;

        info!(chat_id = %chat, user_id = %user, wrong_attempts = record.attempts, "Member admitted");
        self.emit(
            chat,
            user,
            OutcomeKind::Admitted {
                wrong_attempts: record.attempts,
            },
        );

        Ok(())
    }

    /// Removal path shared by timeout, lockout and failed delivery. Returns
    /// false if the record was already gone (someone else resolved it).
    pub(crate) async fn remove(
        &self,
        record: &PendingChallenge,
        reason: RemovalReason,
    ) -> Result<bool, GateError> {
        let (chat, user) = (record.chat_id, record.user_id);

        if !self.store.delete_pending(user, chat).await? {
            debug!(chat_id = %chat, user_id = %user, reason = ?reason, "Already resolved, not removing");
            return Ok(false);
        }
        self.scheduler.cancel(TaskKey::challenge(chat, user));

        if let Err(e) = self.platform.kick(chat, user).await {
            warn!(chat_id = %chat, user_id = %user, error = %e, "Failed to remove member");
        }

        if let Some(prompt) = record.prompt {
            self.cleanup_prompt(chat, prompt, &delivery::removed_status(reason))
                .await;
        }

        let config = self.config.current().await;
        let notice = match reason {
            RemovalReason::Undeliverable => {
                delivery::undeliverable_notice(&record.member_name, &self.bot_username)
            }
            _ => delivery::removal_notice(&record.member_name, reason),
        };
        self.post_notice(chat, &notice, config.gate.notice_delete_after_secs)
            .await;

        info!(chat_id = %chat, user_id = %user, reason = ?reason, "Member removed");
        self.emit(chat, user, OutcomeKind::Removed { reason });

        Ok(true)
    }

    fn arm_expiry(&self, chat: ChatId, user: UserId, expires_at: chrono::DateTime<chrono::Utc>) {
        let gate = self.clone();
        let delay = delay_until(expires_at, self.clock.now());

        self.scheduler.arm(TaskKey::challenge(chat, user), delay, async move {
            if let Err(e) = gate.expire(chat, user).await {
                warn!(chat_id = %chat, user_id = %user, error = %e, "Challenge expiry failed");
            }
        });
    }

    /// Group prompts are deleted, private prompts are edited to a final status
    async fn cleanup_prompt(&self, chat: ChatId, prompt: MessageRef, status: &str) {
        let result = if prompt.chat_id == chat {
            self.platform.delete_message(prompt).await
        } else {
            self.platform.edit_message(prompt, status, None).await
        };

        if let Err(e) = result {
            debug!(chat_id = %chat, error = %e, "Failed to clean up prompt");
        }
    }

    /// Post a group message that removes itself after `delete_after_secs`
    async fn post_notice(&self, chat: ChatId, text: &str, delete_after_secs: u64) {
        match self.platform.send_message(chat, text, None).await {
            Ok(message) => self.schedule_delete(message, delete_after_secs),
            Err(e) => warn!(chat_id = %chat, error = %e, "Failed to post notice"),
        }
    }

    fn schedule_delete(&self, message: MessageRef, after_secs: u64) {
        if after_secs == 0 {
            return;
        }

        let platform = self.platform.clone();
        self.scheduler.after(Duration::from_secs(after_secs), async move {
            let _ = platform.delete_message(message).await;
        });
    }

    async fn discard(&self, message: MessageRef) {
        if let Err(e) = self.platform.delete_message(message).await {
            debug!(chat_id = %message.chat_id, error = %e, "Failed to delete message");
        }
    }

    async fn acknowledge(&self, callback_id: &str, text: Option<&str>) {
        if let Err(e) = self.platform.answer_callback(callback_id, text).await {
            debug!(error = %e, "Failed to answer callback");
        }
    }

    fn emit(&self, chat: ChatId, user: UserId, kind: OutcomeKind) {
        let _ = self.outcomes.send(GateOutcome {
            chat_id: chat,
            user_id: user,
            kind,
            at: self.clock.now(),
        });
    }
}

fn toast_for(error: &GateError) -> String {
    match error {
        GateError::NotFound => delivery::ENDED_TOAST.to_string(),
        GateError::Expired => delivery::EXPIRED_TOAST.to_string(),
        GateError::Mismatch { remaining } => delivery::mismatch_toast(*remaining),
        GateError::Lockout => delivery::LOCKOUT_TOAST.to_string(),
        GateError::Platform(_) | GateError::Store(_) => delivery::RETRY_TOAST.to_string(),
    }
}
