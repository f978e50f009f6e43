// src/accumulator/mod.rs
//! Message accumulator
//!
//! Collects the user's outgoing fragments per conversation and triggers a
//! single reply once the user has been quiet for the debounce window. The reply
//! itself waits a random "thinking" delay with the contact marked as typing,
//! then asks the reply generator and appends the answer to the store.
//!
//! Every conversation has its own buffer and timer. A timer only drains the
//! buffer generation it was armed for, and the check and the drain happen under
//! one lock, so a fragment is never lost or sent twice.

use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::models::{ContactId, DeliveryStatus, Message};
use crate::reply::{ReplyGenerator, ReplyRequest};
use crate::store::ConversationStore;

pub mod buffer;

pub use buffer::{Batch, Fragment, PendingBuffer};

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Quiet period after the last fragment before a reply is triggered
    pub debounce: Duration,
    /// Bounds of the random delay before the generator is called
    pub think_time_min: Duration,
    pub think_time_max: Duration,
    /// Number of trailing messages handed to the generator
    pub history_limit: usize,
    /// Joins the fragments of one batch
    pub delimiter: String,
    /// Sent as the reply when generation fails
    pub fallback_reply: String,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        AccumulatorConfig {
            debounce: Duration::from_millis(3500),
            think_time_min: Duration::from_secs(3),
            think_time_max: Duration::from_secs(7),
            history_limit: 15,
            delimiter: " | ".to_string(),
            fallback_reply: "My connection is bad right now, I'll answer you in a bit...".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct MessageAccumulator {
    shared: Arc<Shared>,
}

struct Shared {
    config: AccumulatorConfig,
    store: Arc<TokioMutex<ConversationStore>>,
    generator: Arc<dyn ReplyGenerator>,
    user_name: String,
    buffers: Mutex<HashMap<ContactId, PendingBuffer>>,
    // Timer tasks that have drained their batch and moved on to replying
    replies: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MessageAccumulator {
    pub fn new(
        config: AccumulatorConfig,
        store: Arc<TokioMutex<ConversationStore>>,
        generator: Arc<dyn ReplyGenerator>,
        user_name: &str,
    ) -> Self {
        MessageAccumulator {
            shared: Arc::new(Shared {
                config,
                store,
                generator,
                user_name: user_name.to_string(),
                buffers: Mutex::new(HashMap::new()),
                replies: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.shared.config
    }

    /// Queue a fragment for `contact_id` and restart its debounce timer.
    /// Returns false if the accumulator has been shut down.
    pub fn submit(&self, contact_id: &str, fragment: Fragment) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            warn!("Ignoring fragment for {}: accumulator is shut down", contact_id);
            return false;
        }
        self.shared.clone().enqueue(contact_id, fragment)
    }

    /// Number of fragments waiting for the debounce timer
    pub fn pending_fragments(&self, contact_id: &str) -> usize {
        self.shared
            .lock_buffers()
            .get(contact_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Cancel every pending timer and in-flight reply. Later submits are ignored.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Same lock order as `fire`: buffers, then replies
        let mut buffers = self.shared.lock_buffers();
        for (contact_id, buffer) in buffers.iter_mut() {
            if !buffer.is_empty() {
                info!("Discarding {} pending fragments for {}", buffer.len(), contact_id);
            }
            buffer.cancel();
        }

        let mut replies = self.shared.lock_replies();
        let in_flight = replies.iter().filter(|h| !h.is_finished()).count();
        for reply in replies.drain(..) {
            reply.abort();
        }
        info!("Accumulator shut down, aborted {} in-flight replies", in_flight);
    }
}

impl Shared {
    /// Push a fragment and re-arm the timer. `closed` is checked again under
    /// the buffer lock: shutdown flips it before taking that lock, so either
    /// this push is refused or shutdown cancels the timer armed here.
    fn enqueue(self: Arc<Self>, contact_id: &str, fragment: Fragment) -> bool {
        let mut buffers = self.lock_buffers();
        if self.closed.load(Ordering::SeqCst) {
            warn!("Ignoring fragment for {}: accumulator shut down meanwhile", contact_id);
            return false;
        }

        let buffer = buffers.entry(contact_id.to_string()).or_default();
        let generation = buffer.push(fragment);

        // The timer needs the buffer lock to drain, so it cannot fire before it is armed
        let shared = self.clone();
        let contact = contact_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            shared.fire(contact, generation).await;
        });
        buffer.arm(timer);

        debug!(
            "Queued fragment #{} for {} (generation {})",
            buffer.len(),
            contact_id,
            generation
        );
        true
    }

    fn lock_buffers(&self) -> MutexGuard<'_, HashMap<ContactId, PendingBuffer>> {
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_replies(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Debounce expiry: drain the buffer if this timer is still the current one
    async fn fire(self: Arc<Self>, contact_id: ContactId, generation: u64) {
        let batch = {
            let mut buffers = self.lock_buffers();
            let drained = buffers
                .get_mut(&contact_id)
                .and_then(|buffer| buffer.drain(generation));

            match drained {
                Some((batch, timer)) => {
                    // Keep our own handle reachable so shutdown can still abort the reply
                    if let Some(timer) = timer {
                        let mut replies = self.lock_replies();
                        replies.retain(|h| !h.is_finished());
                        replies.push(timer);
                    }
                    batch
                }
                None => {
                    debug!("Timer generation {} for {} superseded", generation, contact_id);
                    return;
                }
            }
        };

        if batch.is_empty() {
            debug!("Nothing queued for {} when the timer fired", contact_id);
            return;
        }

        self.reply(contact_id, batch).await;
    }

    fn think_time(&self) -> Duration {
        let (min, max) = (self.config.think_time_min, self.config.think_time_max);
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    async fn reply(&self, contact_id: ContactId, batch: Batch) {
        let text = batch.joined(&self.config.delimiter);
        info!("Dispatching {} fragments for {}", batch.fragments.len(), contact_id);

        let (contact, history) = {
            let mut store = self.store.lock().await;
            store.advance_messages(&contact_id, &batch.message_ids, DeliveryStatus::Delivered);
            let contact = store.contact(&contact_id).cloned();
            let history = store.history(&contact_id, self.config.history_limit);
            if contact.is_some() {
                store.begin_typing(&contact_id);
            }
            (contact, history)
        };

        let contact = match contact {
            Some(contact) => contact,
            None => {
                warn!("No contact {} to reply as, dropping batch", contact_id);
                return;
            }
        };

        let think_time = self.think_time();
        debug!("{} thinking for {:?}", contact.name, think_time);
        tokio::time::sleep(think_time).await;

        let request = ReplyRequest {
            contact_name: contact.name.clone(),
            persona: contact.persona.clone(),
            user_name: self.user_name.clone(),
            history,
            text,
            media: batch.media,
        };

        let reply = match self.generator.generate(&request).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!("Reply generator returned a blank reply for {}", contact_id);
                self.config.fallback_reply.clone()
            }
            Err(e) => {
                error!("Reply generation for {} failed: {}", contact_id, e);
                self.config.fallback_reply.clone()
            }
        };

        let mut store = self.store.lock().await;
        match Message::incoming(&reply) {
            Ok(message) => {
                if let Err(e) = store.append(&contact_id, message) {
                    error!("Failed to append reply for {}: {}", contact_id, e);
                }
                // Only the messages this reply answers; later sends wait for their own batch
                store.advance_messages(&contact_id, &batch.message_ids, DeliveryStatus::Read);
            }
            Err(e) => error!("Cannot build reply message for {}: {}", contact_id, e),
        }
        store.end_typing(&contact_id);
    }
}
