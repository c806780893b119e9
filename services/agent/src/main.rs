//! Solace Companion Agent
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Wiring the session core to real collaborators: cpal audio devices, the
//!    care backend's negotiation endpoint, its instruction feed, and the
//!    builtin tool executor.
//! 4. Driving a push-to-talk session from the terminal until `/quit` or
//!    Ctrl+C.

mod audio;
mod config;
mod feed;
mod tools;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use solace_realtime::relay::InstructionFeed;
use solace_realtime::negotiate::HttpNegotiator;
use solace_realtime::{SessionEvent, SessionOptions, SessionRuntime, start_session};

use crate::audio::{CpalCapturer, CpalRenderer};
use crate::config::Config;
use crate::feed::HttpInstructionFeed;
use crate::tools::BuiltinTools;

#[derive(Parser, Debug)]
#[command(name = "solace-agent", about = "Live voice companion session for one care subject")]
struct Cli {
    /// Care subject to open the session for.
    subject_id: String,
    /// Voice override for this session.
    #[arg(long)]
    voice: Option<String>,
    /// Extra context handed to the negotiation service.
    #[arg(long)]
    context: Option<String>,
    /// Run without the caregiver instruction feed.
    #[arg(long)]
    no_feed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let cli = Cli::parse();
    info!(subject = %cli.subject_id, backend = %config.backend_url, "starting companion session");

    let feed: Option<Arc<dyn InstructionFeed>> = if cli.no_feed {
        None
    } else {
        Some(Arc::new(HttpInstructionFeed::new(
            config.backend_url.clone(),
            config.feed_poll_interval,
        )))
    };
    let runtime = SessionRuntime {
        negotiator: Arc::new(HttpNegotiator::new(config.negotiation_url())),
        capturer: Arc::new(CpalCapturer::new()),
        renderer: Arc::new(CpalRenderer::new()),
        tools: Arc::new(BuiltinTools::new(config.backend_url.clone())),
        feed,
    };
    let options = SessionOptions {
        voice: cli.voice.clone().or_else(|| config.voice.clone()),
        context_text: cli.context.clone(),
        tool_manifest: BuiltinTools::manifest(),
        ..SessionOptions::default()
    };

    let (handle, mut events) = start_session(&runtime, &cli.subject_id, options)
        .await
        .context("Failed to start session")?;
    info!(session_id = %handle.session_id(), "connected");
    println!("Press Enter to talk, Enter again to send. /say <text> types a turn, /quit leaves.");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Transcript { text, is_final: true } => println!("you: {text}"),
                SessionEvent::Transcript { text, .. } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                SessionEvent::ResponseDone => println!(),
                SessionEvent::TurnChanged(state) => debug!(?state, "turn changed"),
                SessionEvent::FunctionCall { name, .. } => info!(%name, "tool requested"),
                SessionEvent::FunctionResult { name, .. } => info!(%name, "tool completed"),
                SessionEvent::Error(message) => warn!(%message, "session error"),
                SessionEvent::Connected | SessionEvent::AudioChunk(_) => {}
                SessionEvent::Disconnected => {
                    println!();
                    info!("session disconnected");
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut talking = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {
                        if talking {
                            handle.stop_recording().await?;
                            println!("(sent)");
                        } else {
                            handle.start_recording().await?;
                            println!("(listening; press Enter to send)");
                        }
                        talking = !talking;
                    }
                    "/quit" => break,
                    say if say.starts_with("/say ") => {
                        handle.send_text(say.trim_start_matches("/say ").to_string()).await?;
                    }
                    other => {
                        println!("unrecognized input {other:?}; Enter toggles the microphone, /say <text>, /quit");
                    }
                }
            }
        }
    }

    handle.stop().await?;
    let _ = printer.await;
    info!("agent shut down");
    Ok(())
}
