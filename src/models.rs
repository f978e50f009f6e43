use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a contact, which is also the key of its conversation
pub type ContactId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "me")]
    Me,   // The local user
    #[serde(rename = "them")]
    Them, // The persona on the other side
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }
}

/// Inline media attached to a message
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub kind: MediaKind,
    /// `data:<mime>;base64,<payload>`
    pub data_url: String,
    pub mime_type: String,
}

impl MediaPayload {
    /// The base64 payload without its data URL header
    pub fn base64_data(&self) -> &str {
        match self.data_url.split_once(',') {
            Some((_, data)) => data,
            None => &self.data_url,
        }
    }

    /// Fragment queued for the reply generator when the media is sent without text
    pub fn marker(&self) -> String {
        format!("[sent media: {}]", self.kind.as_str())
    }
}

/// Delivery state of a message. Ordered, so a status can only move forward.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent = 0,      // Appended locally
    Delivered = 1, // Picked up by the reply pipeline
    Read = 2,      // Answered by the persona
}

impl DeliveryStatus {
    /// Move to `next` if it is ahead of the current status.
    /// Returns true when the status changed.
    pub fn advance(&mut self, next: DeliveryStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MessageError {
    #[error("Message has neither text nor media")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub text: Option<String>,
    pub media: Option<MediaPayload>,
    pub sender: Sender,
    pub timestamp: i64, // Unix milliseconds
    pub delivery_status: DeliveryStatus,
}

impl Message {
    pub fn new(
        sender: Sender,
        text: Option<String>,
        media: Option<MediaPayload>,
        timestamp: i64,
    ) -> Result<Self, MessageError> {
        // Blank text counts as no text
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && media.is_none() {
            return Err(MessageError::Empty);
        }

        let delivery_status = match sender {
            Sender::Me => DeliveryStatus::Sent,
            Sender::Them => DeliveryStatus::Read,
        };

        Ok(Message {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            media,
            sender,
            timestamp,
            delivery_status,
        })
    }

    /// Text message from the persona, stamped now
    pub fn incoming(text: &str) -> Result<Self, MessageError> {
        Self::new(Sender::Them, Some(text.to_string()), None, now_millis())
    }

    /// Message from the local user, stamped now
    pub fn outgoing(text: Option<String>, media: Option<MediaPayload>) -> Result<Self, MessageError> {
        Self::new(Sender::Me, text, media, now_millis())
    }

    /// Short text shown next to the contact in a conversation list
    pub fn preview(&self) -> String {
        match &self.media {
            Some(media) if media.kind == MediaKind::Audio => "🎤 Audio".to_string(),
            Some(media) if media.kind == MediaKind::Image => "📷 Photo".to_string(),
            _ => self.text.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub avatar: Option<String>,
    pub persona: String, // Instructions handed to the reply generator
    pub last_message: String,
    pub last_message_time: i64,
    pub unread_count: u32,
    pub is_typing: bool,
}

impl Contact {
    pub fn new(id: &str, name: &str, persona: &str) -> Self {
        Contact {
            id: id.to_string(),
            name: name.to_string(),
            avatar: None,
            persona: persona.to_string(),
            last_message: String::new(),
            last_message_time: now_millis(),
            unread_count: 0,
            is_typing: false,
        }
    }
}

impl std::fmt::Debug for Contact {
    // Persona text is long and not useful in logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("last_message", &self.last_message)
            .field("unread_count", &self.unread_count)
            .field("is_typing", &self.is_typing)
            .finish()
    }
}

/// Persona availability shown in the conversation header
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Online,
    LastSeen(i64), // Unix milliseconds
}

/// Notifications pushed to the front-end
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageAppended { contact_id: ContactId, message: Message },
    StatusChanged { contact_id: ContactId, message_id: String, status: DeliveryStatus },
    TypingChanged { contact_id: ContactId, typing: bool },
    PresenceChanged { contact_id: ContactId, presence: Presence },
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
