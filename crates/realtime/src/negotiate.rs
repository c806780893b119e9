//! Ephemeral credential negotiation.
//!
//! Every session starts with a short-lived grant minted by an external
//! negotiation service; the transport is only dialed once a usable credential
//! is in hand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::NegotiationError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRequest {
    pub subject_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
}

/// A short-lived, single-use grant for one realtime session.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub session_id: String,
    pub credential: SecretString,
    pub expires_at: DateTime<Utc>,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiatedSession, NegotiationError>;
}

/// Wire shape of the negotiation response. `credential` stays optional here
/// so an absent grant maps to a typed error instead of a parse failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiationResponse {
    session_id: String,
    credential: Option<String>,
    expires_at: DateTime<Utc>,
    model: String,
    voice: String,
    endpoint: String,
}

impl NegotiationResponse {
    fn into_session(self) -> Result<NegotiatedSession, NegotiationError> {
        let credential = self
            .credential
            .filter(|credential| !credential.is_empty())
            .ok_or(NegotiationError::MissingCredential)?;
        Ok(NegotiatedSession {
            session_id: self.session_id,
            credential: SecretString::from(credential),
            expires_at: self.expires_at,
            model: self.model,
            voice: self.voice,
            endpoint: self.endpoint,
        })
    }
}

/// Negotiates against an HTTP endpoint speaking the JSON contract above.
pub struct HttpNegotiator {
    client: reqwest::Client,
    url: String,
}

impl HttpNegotiator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiatedSession, NegotiationError> {
        let response = self.client.post(&self.url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(NegotiationError::Status(response.status()));
        }
        let body: NegotiationResponse = response.json().await?;
        body.into_session()
    }
}
