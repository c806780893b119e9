//! Correlated tool-call dispatch.
//!
//! The remote model requests side-effecting work through function-call
//! events; every call is answered with exactly one correlated result, whether
//! the arguments fail to parse, the executor fails, the executor times out,
//! or everything succeeds. Calls run concurrently and never block inbound
//! dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::error::ToolExecutionError;
use crate::events::{ClientEvent, ConversationItem};
use crate::session::SessionEvent;

/// Ceiling after which an unresolved call is answered with a synthetic
/// timeout result.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes a named tool on behalf of the conversation subject.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        subject_id: &str,
    ) -> Result<Value, ToolExecutionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One protocol-correlated call tracked while in flight.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub status: ToolCallStatus,
}

#[derive(Clone)]
pub(crate) struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    subject_id: String,
    timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, ToolCall>>>,
    outbound: mpsc::Sender<ClientEvent>,
    events: mpsc::Sender<SessionEvent>,
}

impl ToolDispatcher {
    pub(crate) fn new(
        executor: Arc<dyn ToolExecutor>,
        subject_id: String,
        timeout: Duration,
        outbound: mpsc::Sender<ClientEvent>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            executor,
            subject_id,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            outbound,
            events,
        }
    }

    /// Handles one function-call-arguments event. Malformed argument payloads
    /// are answered immediately; parseable ones run on their own task.
    pub(crate) async fn dispatch(&self, call_id: String, name: String, arguments_json: String) {
        let arguments = match serde_json::from_str::<Value>(&arguments_json) {
            Ok(arguments) => arguments,
            Err(err) => {
                warn!(%call_id, %name, %err, "tool call arrived with malformed arguments");
                let output = serde_json::json!({
                    "error": format!("malformed arguments: {err}"),
                });
                self.respond(&call_id, &name, output).await;
                return;
            }
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.insert(
                call_id.clone(),
                ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    status: ToolCallStatus::Executing,
                },
            );
        }
        let _ = self
            .events
            .send(SessionEvent::FunctionCall {
                name: name.clone(),
                arguments: arguments.clone(),
            })
            .await;

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                dispatcher.timeout,
                dispatcher
                    .executor
                    .execute(&name, arguments, &dispatcher.subject_id),
            )
            .await;

            let (output, status) = match outcome {
                Ok(Ok(result)) => (result, ToolCallStatus::Completed),
                Ok(Err(err)) => {
                    warn!(%call_id, %name, %err, "tool executor failed");
                    (
                        serde_json::json!({ "error": err.to_string() }),
                        ToolCallStatus::Failed,
                    )
                }
                Err(_) => {
                    warn!(%call_id, %name, ceiling = ?dispatcher.timeout, "tool executor timed out");
                    (
                        serde_json::json!({
                            "error": format!("timed out after {}s", dispatcher.timeout.as_secs()),
                        }),
                        ToolCallStatus::Failed,
                    )
                }
            };

            // The map entry gates the response: whoever removes it answers,
            // so a call id can never be answered twice.
            let Some(mut call) = dispatcher.in_flight.lock().await.remove(&call_id) else {
                debug!(%call_id, "call already resolved; dropping duplicate outcome");
                return;
            };
            call.status = status;
            debug!(call_id = %call.call_id, status = ?call.status, "tool call reached a terminal state");
            dispatcher.respond(&call.call_id, &call.name, output).await;
        });
    }

    async fn respond(&self, call_id: &str, name: &str, output: Value) {
        let item = ConversationItem::function_output(call_id, &output);
        if self
            .outbound
            .send(ClientEvent::ConversationItemCreate { item })
            .await
            .is_err()
        {
            debug!(%call_id, "session closed before the tool result could be delivered");
            return;
        }
        let _ = self.outbound.send(ClientEvent::ResponseCreate).await;
        let _ = self
            .events
            .send(SessionEvent::FunctionResult {
                name: name.to_string(),
                result: output,
            })
            .await;
    }
}
