//! Inter-agent mailbox.
//!
//! A message is stored once; each distinct recipient across `to` and `cc`
//! gets a delivery row that carries its read marker.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use agentdesk_common::{Importance, InboxEntry, Message, MessageDelivery, NewMessage};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{DeskError, Result};
use crate::store::Store;

static MENTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_-]+)").expect("mention regex is valid"));

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("name regex is valid"));

/// Which slice of an inbox to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxScope {
    #[default]
    All,
    /// Addressed in `to`, not merely copied.
    ToMe,
    /// The recipient is `@`-mentioned.
    Mentions,
}

impl InboxScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ToMe => "to_me",
            Self::Mentions => "mentions",
        }
    }
}

impl fmt::Display for InboxScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InboxScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "to_me" | "to-me" => Ok(Self::ToMe),
            "mentions" => Ok(Self::Mentions),
            _ => Err(format!("Invalid inbox scope: {}", s)),
        }
    }
}

pub struct Mailbox {
    store: Arc<dyn Store>,
}

impl Mailbox {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn send(&self, new: NewMessage) -> Result<Message> {
        validate_name(&new.sender)?;
        if new.to.is_empty() && new.cc.is_empty() {
            return Err(DeskError::InvalidInput("message has no recipients".into()));
        }
        for name in new.to.iter().chain(new.cc.iter()) {
            validate_name(name)?;
        }
        if new.subject.trim().is_empty() {
            return Err(DeskError::InvalidInput("message subject is empty".into()));
        }

        let now = Utc::now();
        let mut mentions = extract_mentions(&new.subject);
        for name in extract_mentions(&new.body) {
            if !mentions.contains(&name) {
                mentions.push(name);
            }
        }
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            sender: new.sender,
            to: new.to,
            cc: new.cc,
            subject: new.subject,
            body: new.body,
            importance: new.importance,
            mentions,
            created_at: now,
        };
        let deliveries: Vec<MessageDelivery> = message
            .recipients()
            .into_iter()
            .map(|recipient| MessageDelivery {
                message_id: message.id.clone(),
                recipient,
                delivered_at: now,
                read_at: None,
            })
            .collect();

        self.store.insert_message(&message, &deliveries)?;
        info!(
            message_id = %message.id,
            sender = %message.sender,
            recipients = deliveries.len(),
            importance = %message.importance,
            "message sent"
        );
        Ok(message)
    }

    /// Messages delivered to `recipient`, newest first.
    pub fn inbox(&self, recipient: &str, limit: usize, urgent_only: bool) -> Result<Vec<InboxEntry>> {
        validate_name(recipient)?;
        self.store.inbox(recipient, limit, urgent_only)
    }

    /// Every message that mentions `@name`, whether or not it was delivered
    /// to `name`.
    pub fn mentioning(&self, name: &str, limit: usize) -> Result<Vec<Message>> {
        validate_name(name)?;
        self.store.messages_mentioning(name, limit)
    }

    pub fn mark_read(&self, message_id: &str, recipient: &str) -> Result<()> {
        if !self.store.mark_read(message_id, recipient, Utc::now())? {
            return Err(DeskError::InvalidInput(format!(
                "message {} was not delivered to {}",
                message_id, recipient
            )));
        }
        Ok(())
    }

    pub fn unread_count(&self, recipient: &str) -> Result<usize> {
        self.store.unread_count(recipient)
    }
}

/// Narrow inbox results to `scope` as seen by `me`.
pub fn filter_scope(entries: Vec<InboxEntry>, scope: InboxScope, me: &str) -> Vec<InboxEntry> {
    match scope {
        InboxScope::All => entries,
        InboxScope::ToMe => entries
            .into_iter()
            .filter(|e| e.message.to.iter().any(|n| n == me))
            .collect(),
        InboxScope::Mentions => entries
            .into_iter()
            .filter(|e| e.message.mentions.iter().any(|n| n == me))
            .collect(),
    }
}

/// Distinct `@name` mentions in `text`, in order of first appearance.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in MENTION_REGEX.captures_iter(text) {
        let name = &cap[1];
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn validate_name(name: &str) -> Result<()> {
    if !NAME_REGEX.is_match(name) {
        return Err(DeskError::InvalidInput(format!(
            "invalid mailbox name '{}': use letters, digits, '_' or '-'",
            name
        )));
    }
    Ok(())
}

pub fn is_urgent(message: &Message) -> bool {
    message.importance == Importance::Urgent
}
