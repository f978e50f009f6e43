// src/media/capture.rs
//! Asynchronous audio capture
//!
//! A capture reads from any async byte source (a device pipe, a fifo, a file)
//! on a background task until it is stopped. Stopping hands back the recorded
//! audio as an inline payload; cancelling or dropping the capture aborts the
//! task and discards what was recorded.

use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{encode_audio, MediaError};
use crate::models::MediaPayload;

const READ_CHUNK_SIZE: usize = 8 * 1024;

pub struct AudioCapture {
    mime_type: String,
    started: Instant,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<Vec<u8>, MediaError>>>,
}

impl AudioCapture {
    /// Start recording from `source`
    pub fn start<R>(source: R, mime_type: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(record(source, stop_rx));
        info!("Started {} audio capture", mime_type);

        AudioCapture {
            mime_type: mime_type.to_string(),
            started: Instant::now(),
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Time since the capture started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finish recording and encode what was captured
    pub async fn stop(mut self) -> Result<MediaPayload, MediaError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have finished on end of stream
            let _ = stop_tx.send(());
        }

        let task = self
            .task
            .take()
            .ok_or_else(|| MediaError::Capture("capture already finished".to_string()))?;
        let bytes = task.await.map_err(|e| MediaError::Capture(e.to_string()))??;

        info!(
            "Stopped audio capture after {} with {} bytes",
            format_duration(self.elapsed().as_secs()),
            bytes.len()
        );
        encode_audio(&bytes, &self.mime_type)
    }

    /// Discard the recording
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Cancelled audio capture");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("Audio capture dropped while recording, discarding it");
            task.abort();
        }
    }
}

async fn record<R>(mut source: R, mut stop_rx: oneshot::Receiver<()>) -> Result<Vec<u8>, MediaError>
where
    R: AsyncRead + Unpin,
{
    let mut recorded = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            // Checked first so a stop request wins over a ready source
            biased;
            _ = &mut stop_rx => break,
            read = source.read(&mut chunk) => {
                match read? {
                    0 => break, // End of stream
                    n => recorded.extend_from_slice(&chunk[..n]),
                }
            }
        }
    }

    Ok(recorded)
}

/// Format a recording length as `m:ss`
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
