// Simulated presence of the persona
//
// After any activity in a conversation the persona comes online after a short
// random delay and goes back to "last seen" a while later, like someone picking
// up their phone.

use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{now_millis, ChatEvent, ContactId, Presence};

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub online_delay_min: Duration,
    pub online_delay_max: Duration,
    /// How long the persona stays online after activity
    pub online_for: Duration,
    /// Initial "last seen" is up to this long ago
    pub initial_last_seen_max: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        PresenceConfig {
            online_delay_min: Duration::from_millis(1000),
            online_delay_max: Duration::from_millis(2500),
            online_for: Duration::from_secs(20),
            initial_last_seen_max: Duration::from_secs(30 * 60),
        }
    }
}

struct PresenceState {
    presence: Presence,
    timer: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct PresenceSimulator {
    config: PresenceConfig,
    states: Arc<Mutex<HashMap<ContactId, PresenceState>>>,
    event_tx: Option<mpsc::Sender<ChatEvent>>,
}

impl PresenceSimulator {
    pub fn new(config: PresenceConfig, event_tx: Option<mpsc::Sender<ChatEvent>>) -> Self {
        PresenceSimulator {
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContactId, PresenceState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current presence. A contact never seen before was last seen a random
    /// number of minutes ago.
    pub fn current(&self, contact_id: &str) -> Presence {
        let mut states = self.lock();
        self.state(&mut states, contact_id).presence.clone()
    }

    /// Start tracking a contact so its initial "last seen" stays fixed
    pub fn ensure(&self, contact_id: &str) {
        let mut states = self.lock();
        self.state(&mut states, contact_id);
    }

    fn state<'a>(
        &self,
        states: &'a mut HashMap<ContactId, PresenceState>,
        contact_id: &str,
    ) -> &'a mut PresenceState {
        states
            .entry(contact_id.to_string())
            .or_insert_with(|| PresenceState {
                presence: Presence::LastSeen(self.initial_last_seen()),
                timer: None,
            })
    }

    fn initial_last_seen(&self) -> i64 {
        let one_minute = Duration::from_secs(60);
        let max = self.config.initial_last_seen_max.max(one_minute);
        // Whole minutes, like a chat app shows them
        let minutes = rand::thread_rng().gen_range(one_minute..=max).as_secs() / 60;
        let ago = i64::try_from(minutes.saturating_mul(60 * 1000)).unwrap_or(i64::MAX);
        now_millis().saturating_sub(ago)
    }

    fn online_delay(&self) -> Duration {
        let (min, max) = (self.config.online_delay_min, self.config.online_delay_max);
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Restart the online / last-seen cycle after activity in a conversation
    pub fn touch(&self, contact_id: &str) {
        let online_delay = self.online_delay();
        let online_for = self.config.online_for;
        let simulator = self.clone();
        let contact = contact_id.to_string();

        let mut states = self.lock();
        let state = states.entry(contact_id.to_string()).or_insert_with(|| PresenceState {
            presence: Presence::LastSeen(now_millis()),
            timer: None,
        });
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(online_delay).await;
            simulator.set(&contact, Presence::Online);
            tokio::time::sleep(online_for).await;
            simulator.set(&contact, Presence::LastSeen(now_millis()));
        }));
    }

    fn set(&self, contact_id: &str, presence: Presence) {
        {
            let mut states = self.lock();
            if let Some(state) = states.get_mut(contact_id) {
                if state.presence == presence {
                    return;
                }
                state.presence = presence.clone();
            }
        }
        debug!("Presence of {} is now {:?}", contact_id, presence);

        if let Some(event_tx) = &self.event_tx {
            if let Err(e) = event_tx.try_send(ChatEvent::PresenceChanged {
                contact_id: contact_id.to_string(),
                presence,
            }) {
                debug!("Dropped presence event: {}", e);
            }
        }
    }

    /// Abort all presence timers
    pub fn shutdown(&self) {
        for state in self.lock().values_mut() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}
