// src/store/mod.rs
//! Conversation store
//!
//! Owns every message of every conversation for the lifetime of the process and
//! mirrors the full state to a key-value backend after each mutation. The
//! in-memory state is authoritative: a failed write is logged and the session
//! carries on.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{ChatEvent, Contact, ContactId, DeliveryStatus, Message, MessageError, Sender};

pub mod snapshot;
pub mod storage;

pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] MessageError),
}

pub struct ConversationStore {
    storage: Box<dyn KeyValueStore>,
    storage_key: String,
    conversations: BTreeMap<ContactId, Vec<Message>>,
    contacts: Vec<Contact>,
    // Contact -> number of reply pipelines currently thinking
    typing_depth: HashMap<ContactId, u32>,
    event_tx: Option<mpsc::Sender<ChatEvent>>,
}

/// Storage key of a user's snapshot
pub fn storage_key(user_name: &str) -> String {
    let user: String = user_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("chat_history_{}", user)
}

impl ConversationStore {
    pub fn new(storage: Box<dyn KeyValueStore>, user_name: &str, contacts: Vec<Contact>) -> Self {
        let conversations = contacts.iter().map(|c| (c.id.clone(), Vec::new())).collect();
        ConversationStore {
            storage,
            storage_key: storage_key(user_name),
            conversations,
            contacts,
            typing_depth: HashMap::new(),
            event_tx: None,
        }
    }

    /// Forward change notifications to a front-end
    pub fn set_event_sender(&mut self, event_tx: mpsc::Sender<ChatEvent>) {
        self.event_tx = Some(event_tx);
    }

    /// Repopulate from the durable snapshot. A missing or unreadable snapshot
    /// leaves the store empty. Returns the number of messages loaded.
    pub fn load(&mut self) -> usize {
        let contents = match self.storage.get(&self.storage_key) {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                info!("No saved history under {}", self.storage_key);
                return 0;
            }
            Err(e) => {
                warn!("Failed to read saved history {}: {}", self.storage_key, e);
                return 0;
            }
        };

        let conversations = match snapshot::decode(&contents) {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Saved history {} is malformed, starting empty: {}", self.storage_key, e);
                return 0;
            }
        };

        self.conversations = conversations;
        for contact in &self.contacts {
            self.conversations.entry(contact.id.clone()).or_default();
        }

        let ids: Vec<ContactId> = self.contacts.iter().map(|c| c.id.clone()).collect();
        for id in ids {
            self.refresh_preview(&id);
        }

        let total = self.conversations.values().map(|m| m.len()).sum();
        info!("Loaded {} messages in {} conversations", total, self.conversations.len());
        total
    }

    /// Append a message to the end of a conversation and persist
    pub fn append(&mut self, contact_id: &str, mut message: Message) -> Result<&Message, StoreError> {
        if message.text.is_none() && message.media.is_none() {
            return Err(StoreError::InvalidMessage(MessageError::Empty));
        }

        let messages = self.conversations.entry(contact_id.to_string()).or_default();

        // Keep timestamps non-decreasing within the conversation
        if let Some(last) = messages.last() {
            if message.timestamp < last.timestamp {
                debug!("Clamping timestamp of {} to {}", message.id, last.timestamp);
                message.timestamp = last.timestamp;
            }
        }

        debug!("Appending {:?} message {} to {}", message.sender, message.id, contact_id);
        messages.push(message.clone());

        if let Some(contact) = self.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.last_message = message.preview();
            contact.last_message_time = message.timestamp;
            if message.sender == Sender::Them {
                contact.unread_count += 1;
            }
        }

        self.persist();
        self.emit(ChatEvent::MessageAppended {
            contact_id: contact_id.to_string(),
            message,
        });

        // The message was pushed above, so the conversation is non-empty
        let messages = &self.conversations[contact_id];
        Ok(&messages[messages.len() - 1])
    }

    pub fn messages(&self, contact_id: &str) -> &[Message] {
        self.conversations
            .get(contact_id)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    /// The last `limit` messages of a conversation, oldest first
    pub fn history(&self, contact_id: &str, limit: usize) -> Vec<Message> {
        let messages = self.messages(contact_id);
        let start = messages.len().saturating_sub(limit);
        messages[start..].to_vec()
    }

    pub fn contact(&self, contact_id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == contact_id)
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Move one message's status forward. Returns false if the message is
    /// unknown or already at or past `status`.
    pub fn advance_status(&mut self, contact_id: &str, message_id: &str, status: DeliveryStatus) -> bool {
        let changed = match self
            .conversations
            .get_mut(contact_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
        {
            Some(message) => message.delivery_status.advance(status),
            None => false,
        };

        if changed {
            self.persist();
            self.emit(ChatEvent::StatusChanged {
                contact_id: contact_id.to_string(),
                message_id: message_id.to_string(),
                status,
            });
        }
        changed
    }

    /// Move the listed outgoing messages of a conversation forward to `status`.
    /// Unknown ids and incoming messages are skipped. Returns how many changed.
    pub fn advance_messages(&mut self, contact_id: &str, message_ids: &[String], status: DeliveryStatus) -> usize {
        let mut changed = Vec::new();
        if let Some(messages) = self.conversations.get_mut(contact_id) {
            for message in messages
                .iter_mut()
                .filter(|m| m.sender == Sender::Me && message_ids.contains(&m.id))
            {
                if message.delivery_status.advance(status) {
                    changed.push(message.id.clone());
                }
            }
        }

        if !changed.is_empty() {
            self.persist();
            for message_id in &changed {
                self.emit(ChatEvent::StatusChanged {
                    contact_id: contact_id.to_string(),
                    message_id: message_id.clone(),
                    status,
                });
            }
        }
        changed.len()
    }

    /// Reset the unread counter of a contact
    pub fn mark_read(&mut self, contact_id: &str) {
        if let Some(contact) = self.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.unread_count = 0;
        }
    }

    /// A reply started thinking for this contact
    pub fn begin_typing(&mut self, contact_id: &str) {
        let depth = self.typing_depth.entry(contact_id.to_string()).or_insert(0);
        *depth += 1;
        if *depth == 1 {
            self.set_typing(contact_id, true);
        }
    }

    /// A reply finished (successfully or not) for this contact
    pub fn end_typing(&mut self, contact_id: &str) {
        let remaining = match self.typing_depth.get_mut(contact_id) {
            Some(depth) if *depth > 0 => {
                *depth -= 1;
                *depth
            }
            _ => return,
        };
        if remaining == 0 {
            self.typing_depth.remove(contact_id);
            self.set_typing(contact_id, false);
        }
    }

    pub fn is_typing(&self, contact_id: &str) -> bool {
        self.contact(contact_id).map(|c| c.is_typing).unwrap_or(false)
    }

    fn set_typing(&mut self, contact_id: &str, typing: bool) {
        if let Some(contact) = self.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.is_typing = typing;
        }
        self.emit(ChatEvent::TypingChanged {
            contact_id: contact_id.to_string(),
            typing,
        });
    }

    fn refresh_preview(&mut self, contact_id: &str) {
        let last = self
            .conversations
            .get(contact_id)
            .and_then(|messages| messages.last())
            .map(|m| (m.preview(), m.timestamp));

        if let (Some(contact), Some((preview, timestamp))) =
            (self.contacts.iter_mut().find(|c| c.id == contact_id), last)
        {
            contact.last_message = preview;
            contact.last_message_time = timestamp;
        }
    }

    /// Write the full snapshot. Failures are logged, never returned.
    fn persist(&mut self) {
        let contents = match snapshot::encode(&self.conversations) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to serialize conversations: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.storage_key, &contents) {
            warn!("Failed to persist conversations to {}: {}", self.storage_key, e);
        }
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(event_tx) = &self.event_tx {
            // Don't block the store on a slow front-end
            if let Err(e) = event_tx.try_send(event) {
                debug!("Dropped chat event: {}", e);
            }
        }
    }
}
