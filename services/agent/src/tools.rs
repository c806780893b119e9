//! Builtin tools: the manifest advertised during the handshake and the
//! executor behind it.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use solace_realtime::error::ToolExecutionError;
use solace_realtime::events::ToolDef;
use solace_realtime::tools::ToolExecutor;

pub struct BuiltinTools {
    client: reqwest::Client,
    backend_url: String,
}

impl BuiltinTools {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend_url: backend_url.into(),
        }
    }

    /// The function entries offered to the model at session start.
    pub fn manifest() -> Vec<ToolDef> {
        vec![
            ToolDef::function(
                "current_time",
                "Tells the current local date and time.",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDef::function(
                "report_concern",
                "Notifies the care team about something the companion should not handle alone.",
                json!({
                    "type": "object",
                    "properties": {
                        "severity": { "type": "string", "enum": ["low", "medium", "high"] },
                        "note": { "type": "string" }
                    },
                    "required": ["severity", "note"]
                }),
            ),
        ]
    }
}

#[async_trait]
impl ToolExecutor for BuiltinTools {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        subject_id: &str,
    ) -> Result<Value, ToolExecutionError> {
        match name {
            "current_time" => Ok(json!({ "now": chrono::Local::now().to_rfc3339() })),
            "report_concern" => {
                let severity = arguments
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("low");
                let note = arguments
                    .get("note")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let body = json!({
                    "subjectId": subject_id,
                    "severity": severity,
                    "note": note,
                });
                self.client
                    .post(format!("{}/alerts", self.backend_url))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|err| {
                        ToolExecutionError::new(format!("alert delivery failed: {err}"))
                    })?
                    .error_for_status()
                    .map_err(|err| ToolExecutionError::new(format!("alert rejected: {err}")))?;
                info!(%subject_id, %severity, "concern escalated to the care team");
                Ok(json!({ "delivered": true }))
            }
            other => Err(ToolExecutionError::new(format!("unknown tool: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_advertises_function_entries() {
        let manifest = BuiltinTools::manifest();
        assert_eq!(manifest.len(), 2);
        assert!(manifest.iter().all(|tool| tool.kind == "function"));
        assert!(manifest.iter().any(|tool| tool.name == "report_concern"));
    }

    #[tokio::test]
    async fn current_time_answers_without_touching_the_backend() {
        let tools = BuiltinTools::new("http://unused.invalid");
        let result = tools
            .execute("current_time", json!({}), "senior-42")
            .await
            .unwrap();
        assert!(result["now"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn unknown_tools_are_rejected() {
        let tools = BuiltinTools::new("http://unused.invalid");
        let err = tools
            .execute("open_pod_bay_doors", json!({}), "senior-42")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }
}
