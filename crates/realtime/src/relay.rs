//! Caregiver instruction relay.
//!
//! Subscribes to the subject's external instruction feed for the lifetime of
//! a session and injects `message` instructions as synthetic user turns over
//! the same commit path captured audio uses. An instruction is marked
//! executed only after injection succeeds, so a failed one stays pending for
//! a later attempt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::ClientEvent;
use crate::session::inject_user_text;

#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    pub id: String,
    pub kind: InstructionKind,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum InstructionKind {
    Message,
    Unsupported,
}

impl From<String> for InstructionKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "message" => Self::Message,
            _ => Self::Unsupported,
        }
    }
}

/// External instruction source keyed by subject. Dropping the receiver ends
/// the subscription.
#[async_trait]
pub trait InstructionFeed: Send + Sync {
    async fn subscribe(&self, subject_id: &str) -> anyhow::Result<mpsc::Receiver<Instruction>>;

    async fn mark_executed(&self, instruction_id: &str) -> anyhow::Result<()>;
}

pub(crate) fn spawn_relay(
    feed: Arc<dyn InstructionFeed>,
    subject_id: String,
    outbound: mpsc::Sender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut instructions = match feed.subscribe(&subject_id).await {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(%subject_id, %err, "instruction feed subscription failed");
                return;
            }
        };
        while let Some(instruction) = instructions.recv().await {
            relay_one(feed.as_ref(), &instruction, &outbound).await;
        }
        debug!(%subject_id, "instruction feed closed");
    })
}

async fn relay_one(
    feed: &dyn InstructionFeed,
    instruction: &Instruction,
    outbound: &mpsc::Sender<ClientEvent>,
) {
    if instruction.kind != InstructionKind::Message {
        debug!(id = %instruction.id, kind = ?instruction.kind, "skipping unsupported instruction kind");
        return;
    }
    if inject_user_text(outbound, &instruction.payload).await.is_err() {
        warn!(id = %instruction.id, "instruction injection failed; leaving it unexecuted");
        return;
    }
    if let Err(err) = feed.mark_executed(&instruction.id).await {
        // The instruction was delivered; a replay on the next session is the
        // at-least-once cost of a lost acknowledgment.
        warn!(id = %instruction.id, %err, "failed to mark instruction executed");
    }
}
