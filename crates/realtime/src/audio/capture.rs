//! Push-to-talk capture pipeline.
//!
//! One bounded segment at a time: `start` arms the device, `stop_and_commit`
//! drains it, frames and encodes the segment, and submits it through the
//! session's outbound write path followed by a commit and a response request.

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{AudioCapturer, encode_pcm16_base64};
use crate::error::CaptureError;
use crate::events::ClientEvent;

/// Samples per append frame: 100 ms at the 24 kHz wire rate.
pub(crate) const FRAME_SAMPLES: usize = 2_400;

/// One encoder-bound slice of a capture segment.
struct AudioFrame<'a> {
    seq: u32,
    samples: &'a [i16],
}

fn frames(segment: &[i16]) -> impl Iterator<Item = AudioFrame<'_>> {
    segment
        .chunks(FRAME_SAMPLES)
        .enumerate()
        .map(|(index, samples)| AudioFrame {
            seq: index as u32,
            samples,
        })
}

pub(crate) struct CapturePipeline {
    capturer: std::sync::Arc<dyn AudioCapturer>,
    recording: bool,
}

impl CapturePipeline {
    pub(crate) fn new(capturer: std::sync::Arc<dyn AudioCapturer>) -> Self {
        Self {
            capturer,
            recording: false,
        }
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording
    }

    /// Arms a new segment. Returns `Ok(false)` when one is already running.
    pub(crate) async fn start(&mut self) -> Result<bool, CaptureError> {
        if self.recording {
            debug!("capture already running; ignoring start");
            return Ok(false);
        }
        self.capturer.start().await?;
        self.recording = true;
        Ok(true)
    }

    /// Drains the segment and emits append frames, a commit, and a response
    /// request. The segment buffer is released no matter how the sends fare;
    /// returns `Ok(false)` when nothing was recording.
    pub(crate) async fn stop_and_commit(
        &mut self,
        outbound: &mpsc::Sender<ClientEvent>,
    ) -> Result<bool, CaptureError> {
        if !self.recording {
            debug!("no capture segment to commit");
            return Ok(false);
        }
        // Cleared before device I/O so a failed drain still releases the slot.
        self.recording = false;

        let segment = self.capturer.stop().await?;
        debug!(samples = segment.len(), "capture segment drained");

        for frame in frames(&segment) {
            trace!(seq = frame.seq, samples = frame.samples.len(), "appending frame");
            let event = ClientEvent::InputAudioBufferAppend {
                audio: encode_pcm16_base64(frame.samples),
            };
            if outbound.send(event).await.is_err() {
                warn!("outbound path closed mid-segment; discarding remainder");
                return Ok(true);
            }
        }
        let _ = outbound.send(ClientEvent::InputAudioBufferCommit).await;
        let _ = outbound.send(ClientEvent::ResponseCreate).await;
        Ok(true)
    }

    /// Stops a running segment and discards whatever it held.
    pub(crate) async fn abort(&mut self) {
        if self.recording {
            self.recording = false;
            if let Err(err) = self.capturer.stop().await {
                debug!(%err, "capture device error during abort");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    struct ScriptedCapturer {
        segment: Vec<i16>,
        fail_start: bool,
        started: AtomicBool,
    }

    impl ScriptedCapturer {
        fn with_segment(segment: Vec<i16>) -> Self {
            Self {
                segment,
                fail_start: false,
                started: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AudioCapturer for ScriptedCapturer {
        async fn start(&self) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::Device("microphone revoked".to_string()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<Vec<i16>, CaptureError> {
            self.started.store(false, Ordering::SeqCst);
            Ok(self.segment.clone())
        }
    }

    #[tokio::test]
    async fn commit_emits_frames_then_commit_then_response() {
        let segment: Vec<i16> = (0..FRAME_SAMPLES as i16 + 10).collect();
        let capturer = Arc::new(ScriptedCapturer::with_segment(segment.clone()));
        let mut pipeline = CapturePipeline::new(capturer);
        let (tx, mut rx) = mpsc::channel(16);

        assert!(pipeline.start().await.unwrap());
        assert!(pipeline.stop_and_commit(&tx).await.unwrap());

        let mut appended = Vec::new();
        let mut saw_commit = false;
        let mut saw_response = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ClientEvent::InputAudioBufferAppend { audio } => {
                    assert!(!saw_commit, "append arrived after commit");
                    let bytes = crate::audio::decode_pcm16_base64(&audio).unwrap();
                    appended.extend(
                        bytes
                            .chunks_exact(2)
                            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
                    );
                }
                ClientEvent::InputAudioBufferCommit => saw_commit = true,
                ClientEvent::ResponseCreate => {
                    assert!(saw_commit, "response requested before commit");
                    saw_response = true;
                }
                other => panic!("unexpected outbound event: {other:?}"),
            }
        }
        assert!(saw_commit && saw_response);
        assert_eq!(appended, segment, "frames must reassemble the segment");
    }

    #[tokio::test]
    async fn start_is_a_noop_while_recording() {
        let capturer = Arc::new(ScriptedCapturer::with_segment(vec![1, 2, 3]));
        let mut pipeline = CapturePipeline::new(capturer);
        assert!(pipeline.start().await.unwrap());
        assert!(!pipeline.start().await.unwrap());
    }

    #[tokio::test]
    async fn device_failure_surfaces_locally_and_releases_the_slot() {
        let capturer = Arc::new(ScriptedCapturer {
            segment: vec![],
            fail_start: true,
            started: AtomicBool::new(false),
        });
        let mut pipeline = CapturePipeline::new(capturer);
        assert!(matches!(
            pipeline.start().await,
            Err(CaptureError::Device(_))
        ));
        assert!(!pipeline.is_recording());
    }

    #[tokio::test]
    async fn commit_without_recording_is_a_noop() {
        let capturer = Arc::new(ScriptedCapturer::with_segment(vec![]));
        let mut pipeline = CapturePipeline::new(capturer);
        let (tx, mut rx) = mpsc::channel(4);
        assert!(!pipeline.stop_and_commit(&tx).await.unwrap());
        assert!(rx.try_recv().is_err());
    }
}
