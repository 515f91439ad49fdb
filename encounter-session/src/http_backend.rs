//! HTTP implementation of the encounter backend contract
//!
//! Talks to the encounter service under `/api/v1/encounters`. The owner id is
//! sent in the `X-User-Id` header on every request; failures come back as
//! JSON `{ "detail": ... }` bodies whose message is kept on the error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{BackendError, EncounterBackend};
use crate::config::Config;
use crate::encounter::{Encounter, EncounterState, EncounterStatus, NewMessage};

/// Header carrying the owner identity
pub const OWNER_HEADER: &str = "X-User-Id";

/// Path prefix of the encounter API
const ENCOUNTERS_PATH: &str = "/api/v1/encounters";

/// Body for create and pause requests
#[derive(Debug, Serialize)]
struct StateBody<'a> {
    state: &'a EncounterState,
}

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// reqwest-backed encounter store client
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client with default timeouts
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        Self::from_config(&Config {
            base_url: base_url.to_string(),
            ..Config::default()
        })
    }

    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let cleaned_url = config.base_url.trim_end_matches('/');
        info!("Creating HttpBackend with base_url: {}", cleaned_url);

        let parsed = url::Url::parse(cleaned_url)
            .map_err(|e| BackendError::InvalidUrl(format!("Invalid URL '{}': {}", cleaned_url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BackendError::InvalidUrl(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, ENCOUNTERS_PATH)
    }

    fn encounter_url(&self, encounter_id: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/{}/{}", self.collection_url(), encounter_id, action),
            None => format!("{}/{}", self.collection_url(), encounter_id),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))
    }

    /// Handle HTTP response and convert to the backend error taxonomy
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        debug!("Encounter backend returned {}: {}", status, body);
        Err(BackendError::Status {
            status: status.as_u16(),
            message: error_detail(&body),
        })
    }
}

/// Pull the human-readable message out of an error body
fn error_detail(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.detail,
        Err(_) => Some(body.trim().to_string()),
    }
}

#[async_trait]
impl EncounterBackend for HttpBackend {
    async fn list(
        &self,
        owner_id: &str,
        statuses: &[EncounterStatus],
    ) -> Result<Vec<Encounter>, BackendError> {
        let query: Vec<(&str, &str)> = statuses.iter().map(|s| ("status", s.as_str())).collect();
        let request = self
            .http_client
            .get(self.collection_url())
            .header(OWNER_HEADER, owner_id)
            .query(&query);

        let response = self.send(request).await?;
        self.handle_response(response).await
    }

    async fn create(&self, owner_id: &str, state: EncounterState) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .post(self.collection_url())
            .header(OWNER_HEADER, owner_id)
            .json(&StateBody { state: &state });

        let response = self.send(request).await?;
        let created: Encounter = self.handle_response(response).await?;
        info!("Created encounter {}", created.id);
        Ok(created)
    }

    async fn pause(
        &self,
        owner_id: &str,
        encounter_id: &str,
        state: EncounterState,
    ) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .post(self.encounter_url(encounter_id, Some("pause")))
            .header(OWNER_HEADER, owner_id)
            .json(&StateBody { state: &state });

        let response = self.send(request).await?;
        self.handle_response(response).await
    }

    async fn resume(&self, owner_id: &str, encounter_id: &str) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .post(self.encounter_url(encounter_id, Some("resume")))
            .header(OWNER_HEADER, owner_id);

        let response = self.send(request).await?;
        self.handle_response(response).await
    }

    async fn complete(
        &self,
        owner_id: &str,
        encounter_id: &str,
    ) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .post(self.encounter_url(encounter_id, Some("complete")))
            .header(OWNER_HEADER, owner_id);

        let response = self.send(request).await?;
        self.handle_response(response).await
    }

    async fn active(&self, owner_id: &str) -> Result<Option<Encounter>, BackendError> {
        let request = self
            .http_client
            .get(self.encounter_url("active", None))
            .header(OWNER_HEADER, owner_id);

        let response = self.send(request).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("No active or paused encounter for {}", owner_id);
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    async fn get(&self, owner_id: &str, encounter_id: &str) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .get(self.encounter_url(encounter_id, None))
            .header(OWNER_HEADER, owner_id);

        let response = self.send(request).await?;
        self.handle_response(response).await
    }

    async fn append_message(
        &self,
        owner_id: &str,
        encounter_id: &str,
        message: NewMessage,
    ) -> Result<Encounter, BackendError> {
        let request = self
            .http_client
            .post(self.encounter_url(encounter_id, Some("messages")))
            .header(OWNER_HEADER, owner_id)
            .json(&message);

        let response = self.send(request).await?;
        self.handle_response(response).await
    }
}
