// Common test utilities for integration tests
// This module contains shared code for all integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;

use persona_chat::presence::PresenceConfig;
use persona_chat::reply::{ReplyError, ReplyGenerator, ReplyRequest};
use persona_chat::store::{KeyValueStore, MemoryKeyValueStore};
use persona_chat::{AccumulatorConfig, ChatEvent, ChatSession, Contact, ConversationStore, SessionConfig};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Long enough for every debounce, think time and presence timer to finish
pub const SETTLE: Duration = Duration::from_secs(60);

/// Generator that records every request and answers with a fixed reply
#[derive(Clone)]
pub struct RecordingGenerator {
    requests: Arc<Mutex<Vec<ReplyRequest>>>,
    reply: Result<String, String>,
}

impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        RecordingGenerator {
            requests: Arc::new(Mutex::new(Vec::new())),
            reply: Ok(reply.to_string()),
        }
    }

    pub fn failing(error: &str) -> Self {
        RecordingGenerator {
            requests: Arc::new(Mutex::new(Vec::new())),
            reply: Err(error.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.text).collect()
    }
}

#[async_trait]
impl ReplyGenerator for RecordingGenerator {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, ReplyError> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply.clone().map_err(ReplyError::Other)
    }
}

pub fn test_contacts() -> Vec<Contact> {
    vec![
        Contact::new("1", "Patricia", "You are Patricia, 24, chatting with a friend."),
        Contact::new("2", "Marcos", "You are Marcos, a grumpy neighbour."),
    ]
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        user_name: "Ana".to_string(),
        accumulator: AccumulatorConfig::default(),
        presence: PresenceConfig::default(),
        ..SessionConfig::default()
    }
}

pub fn test_store(storage: impl KeyValueStore + 'static) -> ConversationStore {
    let mut store = ConversationStore::new(Box::new(storage), "Ana", test_contacts());
    store.load();
    store
}

/// Session on in-memory storage with an event channel
pub fn test_session(generator: &RecordingGenerator) -> (ChatSession, mpsc::Receiver<ChatEvent>) {
    setup_logging();
    let (event_tx, event_rx) = mpsc::channel(1000);
    let session = ChatSession::new(
        test_store(MemoryKeyValueStore::new()),
        Arc::new(generator.clone()),
        test_config(),
        Some(event_tx),
    );
    (session, event_rx)
}

/// Drain the events received so far
pub fn collect_events(event_rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }
    events
}

/// A PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 90]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}
