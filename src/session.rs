// Chat session: the send path from the front-end down to the accumulator
//
// Every send appends the outgoing message to the store first, so the user sees
// it immediately, then queues a fragment for the next reply.

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;

use crate::accumulator::{AccumulatorConfig, Fragment, MessageAccumulator};
use crate::media::{self, MediaError};
use crate::models::{MediaKind, MediaPayload, Message, MessageError, Presence};
use crate::presence::{PresenceConfig, PresenceSimulator};
use crate::reply::ReplyGenerator;
use crate::store::{ConversationStore, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("Nothing to send")]
    EmptyMessage(#[from] MessageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_name: String,
    pub max_image_width: u32,
    pub accumulator: AccumulatorConfig,
    pub presence: PresenceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            user_name: "You".to_string(),
            max_image_width: media::MAX_IMAGE_WIDTH,
            accumulator: AccumulatorConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

pub struct ChatSession {
    store: Arc<TokioMutex<ConversationStore>>,
    accumulator: MessageAccumulator,
    presence: PresenceSimulator,
    max_image_width: u32,
}

impl ChatSession {
    /// Wire a session around a store. Events the store emits also carry
    /// presence changes when `event_tx` is given.
    pub fn new(
        store: ConversationStore,
        generator: Arc<dyn ReplyGenerator>,
        config: SessionConfig,
        event_tx: Option<tokio::sync::mpsc::Sender<crate::models::ChatEvent>>,
    ) -> Self {
        let mut store = store;
        if let Some(event_tx) = &event_tx {
            store.set_event_sender(event_tx.clone());
        }
        let store = Arc::new(TokioMutex::new(store));
        let accumulator = MessageAccumulator::new(config.accumulator, store.clone(), generator, &config.user_name);
        let presence = PresenceSimulator::new(config.presence, event_tx);

        ChatSession {
            store,
            accumulator,
            presence,
            max_image_width: config.max_image_width,
        }
    }

    pub fn store(&self) -> Arc<TokioMutex<ConversationStore>> {
        self.store.clone()
    }

    pub fn accumulator(&self) -> &MessageAccumulator {
        &self.accumulator
    }

    pub fn presence(&self, contact_id: &str) -> Presence {
        self.presence.current(contact_id)
    }

    /// Open a conversation: clears its unread counter
    pub async fn open(&self, contact_id: &str) -> Result<(), SessionError> {
        let mut store = self.store.lock().await;
        if store.contact(contact_id).is_none() {
            return Err(SessionError::UnknownContact(contact_id.to_string()));
        }
        store.mark_read(contact_id);
        self.presence.ensure(contact_id);
        Ok(())
    }

    pub async fn send_text(&self, contact_id: &str, text: &str) -> Result<Message, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage(MessageError::Empty));
        }
        let message = Message::outgoing(Some(text.to_string()), None)?;
        self.send(contact_id, message, Fragment::text(text)).await
    }

    /// Send an image from raw bytes. Nothing is sent if the image cannot be read.
    pub async fn send_image(
        &self,
        contact_id: &str,
        caption: Option<&str>,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Message, SessionError> {
        let max_width = self.max_image_width;
        let mime_type = mime_type.to_string();
        let payload = tokio::task::spawn_blocking(move || media::encode_image(&bytes, &mime_type, max_width))
            .await
            .map_err(|e| MediaError::Capture(e.to_string()))??;
        self.send_media(contact_id, caption, payload).await
    }

    pub async fn send_image_file(
        &self,
        contact_id: &str,
        caption: Option<&str>,
        path: &Path,
    ) -> Result<Message, SessionError> {
        let payload = media::load_image(path, self.max_image_width).await?;
        self.send_media(contact_id, caption, payload).await
    }

    /// Send recorded audio, e.g. the result of [`media::AudioCapture::stop`]
    pub async fn send_audio(&self, contact_id: &str, payload: MediaPayload) -> Result<Message, SessionError> {
        if payload.kind != MediaKind::Audio {
            return Err(SessionError::Media(MediaError::Unsupported(payload.mime_type)));
        }
        self.send_media(contact_id, None, payload).await
    }

    async fn send_media(
        &self,
        contact_id: &str,
        caption: Option<&str>,
        payload: MediaPayload,
    ) -> Result<Message, SessionError> {
        let fragment = Fragment::media(caption, payload.clone());
        let message = Message::outgoing(caption.map(|c| c.trim().to_string()), Some(payload))?;
        self.send(contact_id, message, fragment).await
    }

    async fn send(&self, contact_id: &str, message: Message, fragment: Fragment) -> Result<Message, SessionError> {
        if self.accumulator.is_shut_down() {
            return Err(SessionError::Closed);
        }

        let appended = {
            let mut store = self.store.lock().await;
            if store.contact(contact_id).is_none() {
                return Err(SessionError::UnknownContact(contact_id.to_string()));
            }
            store.append(contact_id, message)?.clone()
        };

        self.presence.touch(contact_id);
        if !self.accumulator.submit(contact_id, fragment.for_message(&appended.id)) {
            // Shut down between the check above and the submit
            warn!("Message {} stored but no reply will follow", appended.id);
            return Err(SessionError::Closed);
        }
        Ok(appended)
    }

    /// Cancel pending replies and presence timers
    pub fn shutdown(&self) {
        self.accumulator.shutdown();
        self.presence.shutdown();
        info!("Chat session shut down");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if !self.accumulator.is_shut_down() {
            self.shutdown();
        }
    }
}
