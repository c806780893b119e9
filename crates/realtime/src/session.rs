//! Session lifecycle: negotiation, transport, handshake, and the dispatch
//! loop that ties capture, playback, tools, and the instruction relay
//! together.
//!
//! `start_session` returns a [`SessionHandle`] plus an event receiver; no
//! global state survives it. Inbound transport events are consumed by a
//! single dispatcher in receipt order, while the side effects they trigger
//! (tool execution, playback) run concurrently. All outbound traffic funnels
//! through one writer task that owns the sink, so concurrent producers can
//! never interleave partial writes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::audio::capture::CapturePipeline;
use crate::audio::playback::{PlaybackPipeline, PlaybackUpdate};
use crate::audio::{AudioCapturer, AudioFormat, AudioRenderer};
use crate::error::SessionError;
use crate::events::{
    AudioTranscription, ClientEvent, ConversationItem, ServerEvent, SessionConfig, ToolDef,
    TurnDetection,
};
use crate::negotiate::{NegotiatedSession, NegotiationRequest, Negotiator};
use crate::relay::{self, InstructionFeed};
use crate::tools::{DEFAULT_TOOL_TIMEOUT, ToolDispatcher, ToolExecutor};
use crate::turn::{TurnEvent, TurnState, TurnTracker};

/// Default bound on waiting for the configuration acknowledgment.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const OUTBOUND_QUEUE: usize = 128;
const INBOUND_QUEUE: usize = 128;
const EVENT_QUEUE: usize = 128;
const COMMAND_QUEUE: usize = 8;
const LOCAL_QUEUE: usize = 8;

/// Everything a session borrows from the host application.
pub struct SessionRuntime {
    pub negotiator: Arc<dyn Negotiator>,
    pub capturer: Arc<dyn AudioCapturer>,
    pub renderer: Arc<dyn AudioRenderer>,
    pub tools: Arc<dyn ToolExecutor>,
    pub feed: Option<Arc<dyn InstructionFeed>>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub voice: Option<String>,
    pub context_text: Option<String>,
    pub instructions: Option<String>,
    pub tool_manifest: Vec<ToolDef>,
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    pub tool_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Where transient playback containers live between synthesis and
    /// deletion.
    pub artifact_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            voice: None,
            context_text: None,
            instructions: None,
            tool_manifest: Vec::new(),
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 200,
            vad_silence_duration_ms: 700,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            artifact_dir: std::env::temp_dir(),
        }
    }
}

/// Everything collaborators observe about a live session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Transcript { text: String, is_final: bool },
    AudioChunk(Bytes),
    ResponseDone,
    TurnChanged(TurnState),
    FunctionCall { name: String, arguments: Value },
    FunctionResult { name: String, result: Value },
    Error(String),
}

#[derive(Debug)]
enum SessionCommand {
    StartRecording,
    StopRecording,
    SendText(String),
    Stop,
}

/// Owner-side control of one session. Cloneable; `stop` is idempotent.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<SessionCommand>,
    stopped: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn start_recording(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopRecording).await
    }

    /// Injects a typed user turn through the same commit path captured audio
    /// uses.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SendText(text.into())).await
    }

    /// Tears the session down. Calling it again (or after a transport drop)
    /// is a no-op.
    pub async fn stop(&self) -> Result<(), SessionError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A closed channel means the loop is already gone; that is still a
        // successful stop.
        let _ = self.commands.send(SessionCommand::Stop).await;
        Ok(())
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Negotiates, connects, handshakes, and spawns the session tasks.
///
/// Returns once the far end has acknowledged the configuration; the first
/// event on the receiver is [`SessionEvent::Connected`].
pub async fn start_session(
    runtime: &SessionRuntime,
    subject_id: &str,
    options: SessionOptions,
) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>), SessionError> {
    let request = NegotiationRequest {
        subject_id: subject_id.to_string(),
        voice: options.voice.clone(),
        context_text: options.context_text.clone(),
    };
    // Fail fast: no transport is dialed without a usable grant.
    let grant = runtime.negotiator.negotiate(&request).await?;
    info!(
        session_id = %grant.session_id,
        model = %grant.model,
        voice = %grant.voice,
        "session negotiated"
    );

    let mut ws_request = grant.endpoint.clone().into_client_request()?;
    let bearer = format!("Bearer {}", grant.credential.expose_secret());
    let auth = bearer.parse::<HeaderValue>().map_err(|_| {
        SessionError::Protocol("credential is not usable as a header value".to_string())
    })?;
    ws_request.headers_mut().insert("Authorization", auth);
    ws_request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (ws_stream, _) = connect_async(ws_request).await?;
    let (ws_sink, ws_source) = ws_stream.split();
    info!("transport connected; sending configuration handshake");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (close_tx, close_rx) = oneshot::channel();

    let span = info_span!("voice_session", session_id = %grant.session_id, subject = %subject_id);
    tokio::spawn(write_outbound(ws_sink, outbound_rx, close_rx).instrument(span.clone()));
    let reader = tokio::spawn(
        read_inbound(ws_source, inbound_tx, event_tx.clone()).instrument(span.clone()),
    );

    let config = session_config(&grant, &options);
    if let Err(err) = perform_handshake(
        &outbound_tx,
        &mut inbound_rx,
        &event_tx,
        config,
        options.handshake_timeout,
    )
    .await
    {
        reader.abort();
        return Err(err);
    }

    let relay_task = runtime
        .feed
        .as_ref()
        .map(|feed| relay::spawn_relay(feed.clone(), subject_id.to_string(), outbound_tx.clone()));

    let (local_tx, local_rx) = mpsc::channel(LOCAL_QUEUE);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let driver = SessionDriver {
        turn: TurnTracker::new(),
        capture: CapturePipeline::new(runtime.capturer.clone()),
        playback: PlaybackPipeline::new(
            runtime.renderer.clone(),
            AudioFormat::default(),
            options.artifact_dir.clone(),
            grant.session_id.clone(),
            local_tx,
        ),
        tools: ToolDispatcher::new(
            runtime.tools.clone(),
            subject_id.to_string(),
            options.tool_timeout,
            outbound_tx.clone(),
            event_tx.clone(),
        ),
        relay_task,
        outbound: outbound_tx,
        events: event_tx,
        writer_close: Some(close_tx),
    };
    tokio::spawn(driver.run(inbound_rx, command_rx, local_rx).instrument(span));

    let handle = SessionHandle {
        session_id: grant.session_id,
        commands: command_tx,
        stopped: Arc::new(AtomicBool::new(false)),
    };
    Ok((handle, event_rx))
}

fn session_config(grant: &NegotiatedSession, options: &SessionOptions) -> SessionConfig {
    SessionConfig {
        model: grant.model.clone(),
        voice: grant.voice.clone(),
        instructions: options.instructions.clone(),
        modalities: vec!["audio".to_string(), "text".to_string()],
        input_audio_format: "pcm16".to_string(),
        output_audio_format: "pcm16".to_string(),
        input_audio_transcription: Some(AudioTranscription {
            model: "whisper-1".to_string(),
        }),
        turn_detection: TurnDetection::ServerVad {
            threshold: options.vad_threshold,
            prefix_padding_ms: options.vad_prefix_padding_ms,
            silence_duration_ms: options.vad_silence_duration_ms,
        },
        tools: options.tool_manifest.clone(),
    }
}

/// Sends the configuration event and waits for the far end's acknowledgment.
/// No audio or tool traffic may flow before this resolves.
async fn perform_handshake(
    outbound: &mpsc::Sender<ClientEvent>,
    inbound: &mut mpsc::Receiver<ServerEvent>,
    events: &mpsc::Sender<SessionEvent>,
    config: SessionConfig,
    deadline: Duration,
) -> Result<(), SessionError> {
    outbound
        .send(ClientEvent::SessionUpdate { session: config })
        .await
        .map_err(|_| SessionError::Closed)?;

    let acknowledged = async {
        while let Some(event) = inbound.recv().await {
            match event {
                ServerEvent::SessionUpdated => return true,
                ServerEvent::SessionCreated => {
                    debug!("session announced; awaiting configuration ack");
                }
                other => debug!(?other, "event before handshake ack; skipping"),
            }
        }
        false
    };
    match timeout(deadline, acknowledged).await {
        Ok(true) => {
            info!("handshake acknowledged");
            let _ = events.send(SessionEvent::Connected).await;
            Ok(())
        }
        Ok(false) => Err(SessionError::Closed),
        Err(_) => Err(SessionError::HandshakeTimeout(deadline)),
    }
}

/// Shared injection path for typed turns: relay instructions and
/// `send_text` both go through here.
pub(crate) async fn inject_user_text(
    outbound: &mpsc::Sender<ClientEvent>,
    text: &str,
) -> Result<(), SessionError> {
    outbound
        .send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
        .map_err(|_| SessionError::Closed)?;
    outbound
        .send(ClientEvent::ResponseCreate)
        .await
        .map_err(|_| SessionError::Closed)
}

struct SessionDriver {
    turn: TurnTracker,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    tools: ToolDispatcher,
    relay_task: Option<JoinHandle<()>>,
    outbound: mpsc::Sender<ClientEvent>,
    events: mpsc::Sender<SessionEvent>,
    writer_close: Option<oneshot::Sender<()>>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ServerEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut local: mpsc::Receiver<PlaybackUpdate>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(command) = commands.recv() => match command {
                    SessionCommand::StartRecording => self.start_recording().await,
                    SessionCommand::StopRecording => self.stop_recording().await,
                    SessionCommand::SendText(text) => {
                        if inject_user_text(&self.outbound, &text).await.is_err() {
                            warn!("text injection failed; outbound path is closed");
                        }
                    }
                    SessionCommand::Stop => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(update) = local.recv() => self.on_playback_update(update).await,
                event = inbound.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        info!("transport dropped; session requires an explicit restart");
                        self.shutdown().await;
                        return;
                    }
                },
            }
        }
    }

    /// Inbound events in receipt order; one at a time.
    async fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                debug!("session configuration event after handshake");
            }
            ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
                let _ = self
                    .events
                    .send(SessionEvent::Transcript {
                        text: transcript,
                        is_final: true,
                    })
                    .await;
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta } => {
                let _ = self
                    .events
                    .send(SessionEvent::Transcript {
                        text: delta,
                        is_final: false,
                    })
                    .await;
            }
            ServerEvent::ResponseAudioDelta { delta } => {
                if let Some(chunk) = self.playback.accept_delta(&delta) {
                    self.apply_turn(TurnEvent::AssistantAudioStarted).await;
                    let _ = self.events.send(SessionEvent::AudioChunk(chunk)).await;
                }
            }
            ServerEvent::ResponseAudioDone => self.playback.finish_response(),
            ServerEvent::ResponseDone => {
                let had_audio = self.playback.response_had_audio();
                self.playback.response_boundary();
                self.apply_turn(TurnEvent::ResponseCompleted { had_audio })
                    .await;
                let _ = self.events.send(SessionEvent::ResponseDone).await;
            }
            ServerEvent::SpeechStarted => {
                if self.turn.state() == TurnState::Speaking {
                    info!("barge-in: user speech while the assistant is speaking");
                    self.playback.interrupt();
                    if self.outbound.send(ClientEvent::ResponseCancel).await.is_err() {
                        warn!("cancel could not be delivered; outbound path is closed");
                    }
                    self.apply_turn(TurnEvent::BargeIn).await;
                } else {
                    debug!("user speech started");
                }
            }
            ServerEvent::SpeechStopped => debug!("user speech stopped"),
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.tools.dispatch(call_id, name, arguments).await,
            ServerEvent::Error { error } => {
                warn!(message = %error.message, "remote error event");
                let _ = self.events.send(SessionEvent::Error(error.message)).await;
            }
            ServerEvent::Unknown => debug!("ignoring unrecognized event kind"),
        }
    }

    async fn start_recording(&mut self) {
        match self.capture.start().await {
            Ok(true) => self.apply_turn(TurnEvent::CaptureStarted).await,
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "capture could not start");
                let _ = self.events.send(SessionEvent::Error(err.to_string())).await;
            }
        }
    }

    async fn stop_recording(&mut self) {
        match self.capture.stop_and_commit(&self.outbound).await {
            Ok(true) => self.apply_turn(TurnEvent::CaptureCommitted).await,
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "capture segment was lost");
                let _ = self.events.send(SessionEvent::Error(err.to_string())).await;
            }
        }
    }

    async fn on_playback_update(&mut self, update: PlaybackUpdate) {
        match update {
            PlaybackUpdate::Finished { generation } if generation == self.playback.generation() => {
                self.apply_turn(TurnEvent::PlaybackFinished).await;
            }
            PlaybackUpdate::Finished { generation } => {
                debug!(generation, "completion of a superseded playback; ignoring");
            }
            PlaybackUpdate::Failed { generation, error } => {
                let _ = self.events.send(SessionEvent::Error(error)).await;
                if generation == self.playback.generation() {
                    self.apply_turn(TurnEvent::PlaybackFinished).await;
                }
            }
        }
    }

    async fn apply_turn(&mut self, event: TurnEvent) {
        if let Some(next) = self.turn.apply(event) {
            let _ = self.events.send(SessionEvent::TurnChanged(next)).await;
        }
    }

    /// One-shot teardown shared by explicit stop and transport loss.
    async fn shutdown(&mut self) {
        self.capture.abort().await;
        self.playback.discard();
        if let Some(task) = self.relay_task.take() {
            task.abort();
        }
        if let Some(close) = self.writer_close.take() {
            let _ = close.send(());
        }
        let _ = self.events.send(SessionEvent::Disconnected).await;
        info!("session released");
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    mut close: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut close => break,
            maybe_event = outbound.recv() => {
                let Some(event) = maybe_event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, "unserializable outbound event");
                        continue;
                    }
                };
                if let Err(err) = sink.send(WsMessage::Text(payload.into())).await {
                    warn!(%err, "outbound write failed");
                    break;
                }
            }
        }
    }
    if let Err(err) = sink.close().await {
        debug!(%err, "transport close");
    }
    debug!("outbound writer finished");
}

async fn read_inbound(
    mut source: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    inbound: mpsc::Sender<ServerEvent>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => {
                    if inbound.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "undecodable transport frame");
                    let _ = events
                        .send(SessionEvent::Error(format!(
                            "undecodable transport frame: {err}"
                        )))
                        .await;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                info!(?frame, "transport closed by remote");
                break;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(other) => debug!(?other, "ignoring non-text frame"),
            Err(err) => {
                warn!(%err, "transport receive error");
                break;
            }
        }
    }
    // Dropping the sender tells the dispatch loop the transport is gone.
}
