//! HTTP-polling caregiver instruction feed.
//!
//! Polls the care backend for pending instructions addressed to the active
//! subject and hands them to the session's relay. Marking executed is a
//! separate call so a lost acknowledgment only risks a replay, never a lost
//! instruction.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use solace_realtime::relay::{Instruction, InstructionFeed, InstructionKind};

pub struct HttpInstructionFeed {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    instructions: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedEntry {
    id: String,
    kind: String,
    payload: String,
    #[serde(default)]
    executed_at: Option<DateTime<Utc>>,
}

impl HttpInstructionFeed {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            poll_interval,
        }
    }
}

async fn fetch_pending(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<FeedEntry>> {
    let page: FeedPage = client
        .get(url)
        .query(&[("pending", "true")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(page.instructions)
}

#[async_trait]
impl InstructionFeed for HttpInstructionFeed {
    async fn subscribe(&self, subject_id: &str) -> anyhow::Result<mpsc::Receiver<Instruction>> {
        let (tx, rx) = mpsc::channel(16);
        let client = self.client.clone();
        let url = format!("{}/subjects/{}/instructions", self.base_url, subject_id);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut delivered: HashSet<String> = HashSet::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let entries = match fetch_pending(&client, &url).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        // Feed outages are survivable; the next tick retries.
                        debug!(%err, "instruction poll failed");
                        continue;
                    }
                };
                for entry in entries {
                    if entry.executed_at.is_some() || !delivered.insert(entry.id.clone()) {
                        continue;
                    }
                    let instruction = Instruction {
                        id: entry.id,
                        kind: InstructionKind::from(entry.kind),
                        payload: entry.payload,
                    };
                    if tx.send(instruction).await.is_err() {
                        debug!("subscriber gone; stopping instruction poll");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn mark_executed(&self, instruction_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/instructions/{}/executed", self.base_url, instruction_id);
        self.client.post(url).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_outside_the_contract_map_to_unsupported() {
        assert_eq!(
            InstructionKind::from("message".to_string()),
            InstructionKind::Message
        );
        assert_eq!(
            InstructionKind::from("medication".to_string()),
            InstructionKind::Unsupported
        );
    }

    #[test]
    fn feed_entries_parse_with_and_without_execution_marks() {
        let page: FeedPage = serde_json::from_str(
            r#"{"instructions":[
                {"id":"i1","kind":"message","payload":"call your daughter"},
                {"id":"i2","kind":"message","payload":"done already","executedAt":"2026-08-07T09:00:00Z"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(page.instructions.len(), 2);
        assert!(page.instructions[0].executed_at.is_none());
        assert!(page.instructions[1].executed_at.is_some());
    }
}
