//! Message delivery and receipt tracking.
//!
//! # Responsibility
//! - Send messages with atomic fan-out and mention notifications.
//! - Record first delivery and first read per recipient.
//! - Report unread counts and per-message delivery status.
//!
//! # Invariants
//! - Only users with chat access may post or acknowledge.
//! - Authors never hold a receipt for their own message.
//! - A receipt is read only after it was delivered.
//! - Deleted messages accept no further acknowledgements.
//! - `send_message` is not retried; a busy store surfaces `Unavailable`.
//! - Receipt transitions are idempotent and retried once on contention.

use crate::config::CoreConfig;
use crate::db::now_epoch_ms;
use crate::error::{CoreError, CoreResult};
use crate::model::chat::{
    ChatId, Message, MessageId, MessageKind, MessageListQuery, NewMessage, ReadReceipt,
};
use crate::model::notification::{EntityRef, NewNotification, NotificationKind};
use crate::model::user::UserId;
use crate::repo::access_repo::AccessRepository;
use crate::repo::message_repo::MessageRepository;
use crate::service::access_service::AccessResolver;
use crate::service::retry_once;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<@([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})>")
        .expect("valid mention regex")
});

const MENTION_PREVIEW_MAX_CHARS: usize = 120;

/// Message use-case service.
pub struct MessageService<M: MessageRepository, A: AccessRepository> {
    repo: M,
    access: AccessResolver<A>,
    max_fanout_recipients: usize,
}

impl<M: MessageRepository, A: AccessRepository> MessageService<M, A> {
    /// Creates service; the resolver decides who may post and who receives.
    pub fn new(repo: M, access: AccessResolver<A>, config: &CoreConfig) -> Self {
        Self {
            repo,
            access,
            max_fanout_recipients: config.max_fanout_recipients,
        }
    }

    /// Posts a message, fans it out to the chat audience and notifies
    /// mentioned audience members, all in one transaction.
    pub fn send_message(
        &self,
        chat_id: ChatId,
        author_id: UserId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> CoreResult<Message> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CoreError::invalid_state("message content must not be blank"));
        }
        self.access.ensure_access(author_id, chat_id)?;

        let audience = self.access.chat_audience(chat_id)?;
        let recipients: Vec<UserId> = audience
            .iter()
            .copied()
            .filter(|user_id| *user_id != author_id)
            .collect();
        if recipients.len() > self.max_fanout_recipients {
            warn!(
                "event=message_send module=message status=rejected chat_id={chat_id} recipients={} limit={}",
                recipients.len(),
                self.max_fanout_recipients
            );
            return Err(CoreError::invalid_state(format!(
                "chat audience of {} exceeds fan-out limit {}",
                recipients.len(),
                self.max_fanout_recipients
            )));
        }

        let message = NewMessage {
            id: Uuid::new_v4(),
            chat_id,
            author_id,
            kind,
            content,
        };
        let recipient_set: HashSet<UserId> = recipients.iter().copied().collect();
        let preview = mention_preview(&message.content);
        let notifications: Vec<NewNotification> = extract_mentions(&message.content)
            .into_iter()
            .filter(|user_id| recipient_set.contains(user_id))
            .map(|user_id| NewNotification {
                user_id,
                source_user_id: Some(author_id),
                entity: EntityRef::message(message.id),
                kind: NotificationKind::Mention,
                text: preview.clone(),
            })
            .collect();

        match self.repo.insert_message(&message, &recipients, &notifications) {
            Ok(stored) => {
                info!(
                    "event=message_send module=message status=ok chat_id={chat_id} message_id={} recipients={} mentions={}",
                    stored.id,
                    recipients.len(),
                    notifications.len()
                );
                Ok(stored)
            }
            Err(err) => {
                warn!(
                    "event=message_send module=message status=error chat_id={chat_id} error={err}"
                );
                Err(err.into())
            }
        }
    }

    pub fn get_message(&self, message_id: MessageId) -> CoreResult<Message> {
        self.repo
            .get_message(message_id)?
            .ok_or(CoreError::NotFound {
                entity: "message",
                id: message_id,
            })
    }

    /// Page of chat history for a viewer with access.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        viewer_id: UserId,
        query: &MessageListQuery,
    ) -> CoreResult<Vec<Message>> {
        self.access.ensure_access(viewer_id, chat_id)?;
        Ok(self.repo.list_messages(chat_id, query)?)
    }

    /// Soft-deletes a message; only its author may do so.
    pub fn delete_message(&self, message_id: MessageId, actor_id: UserId) -> CoreResult<()> {
        let message = self.get_message(message_id)?;
        if message.author_id != actor_id {
            return Err(CoreError::forbidden(actor_id, "delete message"));
        }
        self.repo.soft_delete_message(message_id)?;
        info!(
            "event=message_delete module=message status=ok chat_id={} message_id={message_id}",
            message.chat_id
        );
        Ok(())
    }

    /// Records first delivery; returns `false` when already delivered.
    pub fn mark_delivered(&self, message_id: MessageId, user_id: UserId) -> CoreResult<bool> {
        self.ensure_recipient(message_id, user_id)?;
        retry_once("mark_delivered", || {
            self.repo.mark_delivered(message_id, user_id, now_epoch_ms())
        })
    }

    /// Records first read; returns `false` when already read. Reading a
    /// message that was never delivered to `user_id` is `InvalidState`.
    pub fn mark_read(&self, message_id: MessageId, user_id: UserId) -> CoreResult<bool> {
        self.ensure_recipient(message_id, user_id)?;
        retry_once("mark_read", || {
            self.repo.mark_read(message_id, user_id, now_epoch_ms())
        })
    }

    /// Reads every delivered but unread message from others in the chat.
    /// Undelivered messages stay unread.
    pub fn mark_chat_read(&self, chat_id: ChatId, user_id: UserId) -> CoreResult<usize> {
        self.access.ensure_access(user_id, chat_id)?;
        let transitioned = retry_once("mark_chat_read", || {
            self.repo.mark_chat_read(chat_id, user_id, now_epoch_ms())
        })?;
        info!(
            "event=chat_read module=message status=ok chat_id={chat_id} user_id={user_id} transitioned={transitioned}"
        );
        Ok(transitioned)
    }

    pub fn get_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> CoreResult<Option<ReadReceipt>> {
        Ok(self.repo.get_receipt(message_id, user_id)?)
    }

    pub fn unread_count(&self, chat_id: ChatId, user_id: UserId) -> CoreResult<u64> {
        self.access.ensure_access(user_id, chat_id)?;
        Ok(self.repo.unread_count(chat_id, user_id)?)
    }

    /// Receipts of one message: unread first, then most recent reads.
    pub fn delivery_status(&self, message_id: MessageId) -> CoreResult<Vec<ReadReceipt>> {
        self.get_message(message_id)?;
        Ok(self.repo.delivery_status(message_id)?)
    }

    fn ensure_recipient(&self, message_id: MessageId, user_id: UserId) -> CoreResult<()> {
        let message = self.get_message(message_id)?;
        if message.is_deleted {
            return Err(CoreError::invalid_state("message was deleted"));
        }
        if message.author_id == user_id {
            return Err(CoreError::invalid_state(
                "authors do not hold receipts for their own messages",
            ));
        }
        self.access.ensure_access(user_id, message.chat_id)
    }
}

/// Distinct user ids mentioned as `<@uuid>`, in order of first appearance.
pub fn extract_mentions(content: &str) -> Vec<UserId> {
    let mut seen = HashSet::new();
    MENTION_RE
        .captures_iter(content)
        .filter_map(|caps| Uuid::parse_str(&caps[1]).ok())
        .filter(|user_id| seen.insert(*user_id))
        .collect()
}

fn mention_preview(content: &str) -> String {
    let flattened = content.replace(['\n', '\r'], " ");
    let mut preview = flattened
        .chars()
        .take(MENTION_PREVIEW_MAX_CHARS)
        .collect::<String>();
    if flattened.chars().count() > MENTION_PREVIEW_MAX_CHARS {
        preview.push_str("...");
    }
    preview
}
