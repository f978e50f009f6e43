use tokio::task::JoinHandle;

use crate::models::MediaPayload;

/// One unit of outgoing content queued for the next reply
#[derive(Debug, Clone)]
pub struct Fragment {
    pub text: String,
    pub media: Option<MediaPayload>,
    /// Stored message this fragment was sent as, if any
    pub message_id: Option<String>,
}

impl Fragment {
    pub fn text(text: &str) -> Self {
        Fragment {
            text: text.to_string(),
            media: None,
            message_id: None,
        }
    }

    /// Media send. Without a caption the fragment is the media marker.
    pub fn media(caption: Option<&str>, media: MediaPayload) -> Self {
        let text = match caption.map(str::trim).filter(|c| !c.is_empty()) {
            Some(caption) => caption.to_string(),
            None => media.marker(),
        };
        Fragment {
            text,
            media: Some(media),
            message_id: None,
        }
    }

    /// Tie the fragment to the stored message whose status follows the reply
    pub fn for_message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }
}

/// Fragments taken out of a buffer in one step
#[derive(Debug, Default)]
pub struct Batch {
    pub fragments: Vec<String>,
    pub media: Option<MediaPayload>,
    /// Stored messages covered by this batch
    pub message_ids: Vec<String>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn joined(&self, delimiter: &str) -> String {
        self.fragments.join(delimiter)
    }
}

/// Per-conversation accumulation state
#[derive(Default)]
pub struct PendingBuffer {
    fragments: Vec<String>,
    media: Option<MediaPayload>,
    message_ids: Vec<String>,
    // Bumped on every push; a timer only drains the generation it was armed for
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl PendingBuffer {
    /// Queue a fragment and return the generation the next timer must carry.
    /// The previous timer, if any, is aborted.
    pub fn push(&mut self, fragment: Fragment) -> u64 {
        self.fragments.push(fragment.text);
        if let Some(message_id) = fragment.message_id {
            self.message_ids.push(message_id);
        }
        if fragment.media.is_some() {
            self.media = fragment.media;
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.generation
    }

    pub fn arm(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Take everything queued if `generation` is still current.
    /// Returns the batch and the timer handle that was armed for it.
    pub fn drain(&mut self, generation: u64) -> Option<(Batch, Option<JoinHandle<()>>)> {
        if generation != self.generation {
            return None;
        }
        let batch = Batch {
            fragments: std::mem::take(&mut self.fragments),
            media: self.media.take(),
            message_ids: std::mem::take(&mut self.message_ids),
        };
        Some((batch, self.timer.take()))
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Abort the pending timer and drop queued fragments
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.fragments.clear();
        self.media = None;
        self.message_ids.clear();
        self.generation += 1;
    }
}
