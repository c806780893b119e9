//! Batch-then-play response playback.
//!
//! Inbound audio deltas accumulate per response; on the audio-complete signal
//! the buffer is wrapped in a WAV container, persisted transiently, rendered,
//! and the artifact is deleted. A generation counter, bumped on every
//! interrupt, lets stray deltas from a cancelled response be dropped instead
//! of bleeding into the next reply.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AudioFormat, AudioRenderer, decode_pcm16_base64, wav};
use crate::error::PlaybackError;

/// Completion signals from the detached render task back to the dispatch loop.
#[derive(Debug)]
pub(crate) enum PlaybackUpdate {
    Finished { generation: u64 },
    Failed { generation: u64, error: String },
}

pub(crate) struct PlaybackPipeline {
    renderer: Arc<dyn AudioRenderer>,
    format: AudioFormat,
    artifact_dir: PathBuf,
    session_id: String,
    updates: mpsc::Sender<PlaybackUpdate>,
    generation: u64,
    buffer: Vec<u8>,
    chunks_this_response: usize,
    /// Set between an interrupt and the cancelled response's terminal event;
    /// deltas arriving in that window belong to the superseded generation.
    draining: bool,
}

impl PlaybackPipeline {
    pub(crate) fn new(
        renderer: Arc<dyn AudioRenderer>,
        format: AudioFormat,
        artifact_dir: PathBuf,
        session_id: String,
        updates: mpsc::Sender<PlaybackUpdate>,
    ) -> Self {
        Self {
            renderer,
            format,
            artifact_dir,
            session_id,
            updates,
            generation: 0,
            buffer: Vec::new(),
            chunks_this_response: 0,
            draining: false,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn response_had_audio(&self) -> bool {
        self.chunks_this_response > 0
    }

    /// Decodes and buffers one inbound chunk, returning the raw PCM for live
    /// surfacing. `None` means the chunk was stale or undecodable.
    pub(crate) fn accept_delta(&mut self, payload: &str) -> Option<Bytes> {
        if self.draining {
            debug!(
                generation = self.generation,
                "dropping delta from a cancelled response"
            );
            return None;
        }
        let pcm = match decode_pcm16_base64(payload) {
            Ok(pcm) => pcm,
            Err(err) => {
                warn!(%err, "undecodable audio delta");
                return None;
            }
        };
        self.chunks_this_response += 1;
        self.buffer.extend_from_slice(&pcm);
        Some(pcm)
    }

    /// The response's audio is complete: wrap, persist, and render it in the
    /// background so inbound dispatch keeps flowing.
    pub(crate) fn finish_response(&mut self) {
        if self.buffer.is_empty() {
            debug!("audio complete with an empty buffer; nothing to play");
            return;
        }
        let pcm = std::mem::take(&mut self.buffer);
        let generation = self.generation;
        let container = wav::encode_wav(&pcm, &self.format);
        let path = self
            .artifact_dir
            .join(format!("reply-{}-{generation}.wav", self.session_id));
        let renderer = self.renderer.clone();
        let format = self.format;
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let update = match render_once(renderer.as_ref(), &path, &container, &format).await {
                Ok(()) => PlaybackUpdate::Finished { generation },
                Err(err) => {
                    warn!(%err, "playback failed");
                    PlaybackUpdate::Failed {
                        generation,
                        error: err.to_string(),
                    }
                }
            };
            let _ = updates.send(update).await;
        });
    }

    /// Barge-in: invalidate the in-flight response, drop unplayed frames, and
    /// cut the renderer. Safe to call when nothing is playing.
    pub(crate) fn interrupt(&mut self) {
        self.generation += 1;
        self.draining = true;
        self.buffer.clear();
        self.chunks_this_response = 0;
        self.renderer.stop();
        debug!(generation = self.generation, "playback interrupted");
    }

    /// A response reached its terminal event; stale deltas can no longer
    /// arrive, so stop draining and reset the per-response chunk count.
    pub(crate) fn response_boundary(&mut self) {
        self.draining = false;
        self.chunks_this_response = 0;
    }

    /// Session teardown: stop the device and forget any buffered audio.
    pub(crate) fn discard(&mut self) {
        self.renderer.stop();
        self.buffer.clear();
        self.chunks_this_response = 0;
    }
}

async fn render_once(
    renderer: &dyn AudioRenderer,
    path: &Path,
    container: &[u8],
    format: &AudioFormat,
) -> Result<(), PlaybackError> {
    tokio::fs::write(path, container).await?;
    let played = renderer.play(path, format).await;
    remove_artifact(path).await;
    played
}

/// Deletes the transient container. Repeat deletion is a no-op.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "transient audio artifact removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(%err, path = %path.display(), "failed to remove transient artifact"),
    }
}
