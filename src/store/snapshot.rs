// src/store/snapshot.rs
//! JSON snapshot format of the conversation store
//!
//! The snapshot is an object keyed by contact id, each value the ordered list of
//! messages of that conversation. Field names are part of the on-disk format and
//! must stay stable.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ContactId, DeliveryStatus, MediaKind, MediaPayload, Message, Sender};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    sender: Sender,
    timestamp: i64,
    status: DeliveryStatus,
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        let (image, audio) = match &message.media {
            Some(media) if media.kind == MediaKind::Image => (Some(media.data_url.clone()), None),
            Some(media) => (None, Some(media.data_url.clone())),
            None => (None, None),
        };

        MessageRecord {
            id: message.id.clone(),
            text: message.text.clone().unwrap_or_default(),
            image,
            audio,
            mime_type: message.media.as_ref().map(|m| m.mime_type.clone()),
            sender: message.sender,
            timestamp: message.timestamp,
            status: message.delivery_status,
        }
    }
}

impl MessageRecord {
    /// None when the record carries neither text nor media
    fn into_message(self) -> Option<Message> {
        let media = match (self.image, self.audio) {
            (Some(data_url), _) => Some((MediaKind::Image, data_url)),
            (None, Some(data_url)) => Some((MediaKind::Audio, data_url)),
            (None, None) => None,
        }
        .map(|(kind, data_url)| {
            // Older records may lack a MIME type, fall back to the data URL header
            let mime_type = self
                .mime_type
                .clone()
                .or_else(|| mime_from_data_url(&data_url))
                .unwrap_or_default();
            MediaPayload { kind, data_url, mime_type }
        });

        let text = Some(self.text).filter(|t| !t.trim().is_empty());
        if text.is_none() && media.is_none() {
            return None;
        }

        Some(Message {
            id: self.id,
            text,
            media,
            sender: self.sender,
            timestamp: self.timestamp,
            delivery_status: self.status,
        })
    }
}

fn mime_from_data_url(data_url: &str) -> Option<String> {
    let header = data_url.strip_prefix("data:")?.split(',').next()?;
    header.split(';').next().map(|m| m.to_string())
}

/// Serialize all conversations
pub fn encode(conversations: &BTreeMap<ContactId, Vec<Message>>) -> serde_json::Result<String> {
    let records: BTreeMap<&ContactId, Vec<MessageRecord>> = conversations
        .iter()
        .map(|(id, messages)| (id, messages.iter().map(MessageRecord::from).collect()))
        .collect();
    serde_json::to_string(&records)
}

/// Parse a snapshot. Individual records that break the message invariant are dropped.
pub fn decode(contents: &str) -> serde_json::Result<BTreeMap<ContactId, Vec<Message>>> {
    let records: BTreeMap<ContactId, Vec<MessageRecord>> = serde_json::from_str(contents)?;

    let mut conversations = BTreeMap::new();
    for (contact_id, records) in records {
        let total = records.len();
        let messages: Vec<Message> = records
            .into_iter()
            .filter_map(MessageRecord::into_message)
            .collect();
        if messages.len() < total {
            warn!(
                "Dropped {} empty message records from conversation {}",
                total - messages.len(),
                contact_id
            );
        }
        conversations.insert(contact_id, messages);
    }
    Ok(conversations)
}
