//! cpal-backed adapters for the session core's audio seams.
//!
//! The capture side records the default input device on a dedicated worker
//! thread (cpal streams are not `Send`), downmixes to mono, and resamples the
//! drained segment to the wire rate. The render side plays a synthesized
//! container through the default output device, resampled to whatever rate
//! the device wants.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, warn};

use solace_realtime::audio::{AudioCapturer, AudioFormat, AudioRenderer, WIRE_SAMPLE_RATE};
use solace_realtime::error::{CaptureError, PlaybackError};

const RESAMPLE_CHUNK: usize = 1024;
const WORKER_POLL: Duration = Duration::from_millis(25);

/// Converts between sample rates, padding the tail chunk with silence so the
/// fixed-input resampler never drops it.
fn resample_mono(input: &[f32], from_rate: f64, to_rate: f64) -> anyhow::Result<Vec<f32>> {
    if input.is_empty() || (from_rate - to_rate).abs() < f64::EPSILON {
        return Ok(input.to_vec());
    }
    let mut resampler = FastFixedIn::<f32>::new(
        to_rate / from_rate,
        1.0,
        PolynomialDegree::Cubic,
        RESAMPLE_CHUNK,
        1,
    )?;
    let mut output = Vec::with_capacity((input.len() as f64 * to_rate / from_rate) as usize + RESAMPLE_CHUNK);
    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let mut frame = chunk.to_vec();
        frame.resize(RESAMPLE_CHUNK, 0.0);
        let processed = resampler.process(&[frame], None)?;
        output.extend_from_slice(&processed[0]);
    }
    Ok(output)
}

fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// PCM payload of a WAV container as normalized floats.
fn wav_payload_f32(container: &[u8]) -> Vec<f32> {
    container
        .get(44..)
        .unwrap_or(&[])
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

fn log_stream_error(err: cpal::StreamError) {
    warn!(%err, "audio stream error");
}

// --- Capture ---

struct CaptureShared {
    samples: Mutex<Vec<f32>>,
    device_rate: AtomicU32,
    active: AtomicBool,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

pub struct CpalCapturer {
    shared: Arc<CaptureShared>,
}

impl CpalCapturer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CaptureShared {
                samples: Mutex::new(Vec::new()),
                device_rate: AtomicU32::new(WIRE_SAMPLE_RATE),
                active: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }
}

impl Default for CpalCapturer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioCapturer for CpalCapturer {
    async fn start(&self) -> Result<(), CaptureError> {
        if self.shared.active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::Busy);
        }
        self.shared
            .samples
            .lock()
            .map_err(|_| CaptureError::Device("capture state poisoned".to_string()))?
            .clear();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let shared = self.shared.clone();
        let worker = std::thread::spawn(move || capture_worker(shared, ready_tx));
        *self
            .shared
            .worker
            .lock()
            .map_err(|_| CaptureError::Device("capture state poisoned".to_string()))? =
            Some(worker);

        match tokio::task::spawn_blocking(move || ready_rx.recv()).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => {
                self.shared.active.store(false, Ordering::SeqCst);
                Err(CaptureError::Device(message))
            }
            _ => {
                self.shared.active.store(false, Ordering::SeqCst);
                Err(CaptureError::Device("capture worker vanished".to_string()))
            }
        }
    }

    async fn stop(&self) -> Result<Vec<i16>, CaptureError> {
        self.shared.active.store(false, Ordering::SeqCst);
        let worker = self
            .shared
            .worker
            .lock()
            .map_err(|_| CaptureError::Device("capture state poisoned".to_string()))?
            .take();
        if let Some(worker) = worker {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }

        let native = std::mem::take(
            &mut *self
                .shared
                .samples
                .lock()
                .map_err(|_| CaptureError::Device("capture state poisoned".to_string()))?,
        );
        let device_rate = self.shared.device_rate.load(Ordering::SeqCst).max(1);
        debug!(samples = native.len(), device_rate, "capture segment drained from device");
        let wire = resample_mono(&native, device_rate as f64, WIRE_SAMPLE_RATE as f64)
            .map_err(|err| CaptureError::Device(err.to_string()))?;
        Ok(f32_to_i16(&wire))
    }
}

fn capture_worker(shared: Arc<CaptureShared>, ready: std::sync::mpsc::Sender<Result<(), String>>) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err("no default input device".to_string()));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(supported) => supported,
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels as usize;
    shared.device_rate.store(config.sample_rate.0, Ordering::SeqCst);

    let sink = shared.clone();
    let built = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| push_mono(&sink, data, channels),
            log_stream_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                push_mono(&sink, &floats, channels);
            },
            log_stream_error,
            None,
        ),
        other => {
            let _ = ready.send(Err(format!("unsupported input sample format {other:?}")));
            return;
        }
    };
    let stream = match built {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready.send(Err(err.to_string()));
        return;
    }
    let _ = ready.send(Ok(()));

    while shared.active.load(Ordering::SeqCst) {
        std::thread::sleep(WORKER_POLL);
    }
    drop(stream);
}

fn push_mono(shared: &CaptureShared, interleaved: &[f32], channels: usize) {
    if let Ok(mut samples) = shared.samples.lock() {
        for frame in interleaved.chunks(channels.max(1)) {
            let sum: f32 = frame.iter().sum();
            samples.push(sum / frame.len() as f32);
        }
    }
}

// --- Render ---

pub struct CpalRenderer {
    stop_flag: Arc<AtomicBool>,
}

impl CpalRenderer {
    pub fn new() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for CpalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioRenderer for CpalRenderer {
    async fn play(&self, container: &Path, format: &AudioFormat) -> Result<(), PlaybackError> {
        let bytes = tokio::fs::read(container).await?;
        let pcm = wav_payload_f32(&bytes);
        if pcm.is_empty() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let stop = self.stop_flag.clone();
        let source_rate = format.sample_rate;
        tokio::task::spawn_blocking(move || render_blocking(pcm, source_rate, stop))
            .await
            .map_err(|err| PlaybackError::Device(format!("render worker failed: {err}")))?
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

fn render_blocking(
    samples: Vec<f32>,
    source_rate: u32,
    stop: Arc<AtomicBool>,
) -> Result<(), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("no default output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|err| PlaybackError::Device(err.to_string()))?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    let resampled = resample_mono(&samples, source_rate as f64, device_rate as f64)
        .map_err(|err| PlaybackError::Device(err.to_string()))?;

    // Queue the whole reply up front, duplicated across device channels.
    let rb = HeapRb::<f32>::new(resampled.len() * channels + 1);
    let (mut producer, mut consumer) = rb.split();
    for sample in &resampled {
        for _ in 0..channels {
            let _ = producer.try_push(*sample);
        }
    }

    let drained = Arc::new(AtomicBool::new(false));
    let drained_cb = drained.clone();
    let built = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let filled = consumer.pop_slice(data);
                data[filled..].fill(0.0);
                if filled == 0 {
                    drained_cb.store(true, Ordering::SeqCst);
                }
            },
            log_stream_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| {
                let mut filled = 0;
                for slot in data.iter_mut() {
                    match consumer.try_pop() {
                        Some(sample) => {
                            *slot = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32)
                                as i16;
                            filled += 1;
                        }
                        None => *slot = 0,
                    }
                }
                if filled == 0 {
                    drained_cb.store(true, Ordering::SeqCst);
                }
            },
            log_stream_error,
            None,
        ),
        other => {
            return Err(PlaybackError::Device(format!(
                "unsupported output sample format {other:?}"
            )));
        }
    };
    let stream = built.map_err(|err| PlaybackError::Device(err.to_string()))?;
    stream
        .play()
        .map_err(|err| PlaybackError::Device(err.to_string()))?;

    while !stop.load(Ordering::SeqCst) && !drained.load(Ordering::SeqCst) {
        std::thread::sleep(WORKER_POLL);
    }
    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_the_sample_count_going_48k_to_24k() {
        let input = vec![0.25f32; 4096];
        let output = resample_mono(&input, 48_000.0, 24_000.0).unwrap();
        // The tail chunk is zero-padded, so allow one chunk of slack.
        let expected = input.len() / 2;
        assert!(output.len() >= expected && output.len() <= expected + RESAMPLE_CHUNK);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let input = vec![0.5f32, -0.5, 0.0];
        assert_eq!(resample_mono(&input, 24_000.0, 24_000.0).unwrap(), input);
    }

    #[test]
    fn wav_payload_skips_the_header_and_normalizes() {
        let mut container = vec![0u8; 44];
        container.extend_from_slice(&0x4000i16.to_le_bytes());
        let payload = wav_payload_f32(&container);
        assert_eq!(payload.len(), 1);
        assert!((payload[0] - 0.5).abs() < 0.001);
    }

    #[test]
    fn truncated_container_yields_no_samples() {
        assert!(wav_payload_f32(&[0u8; 10]).is_empty());
    }

    #[test]
    fn f32_to_i16_clamps_out_of_range_samples() {
        let converted = f32_to_i16(&[2.0, -2.0, 0.0]);
        assert_eq!(converted, vec![i16::MAX, i16::MIN, 0]);
    }
}
