//! Contract for the server-side encounter store

use async_trait::async_trait;

use crate::encounter::{Encounter, EncounterState, EncounterStatus, NewMessage};

/// Failures talking to the encounter backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {}", .message.as_deref().unwrap_or("no details"))]
    Status { status: u16, message: Option<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// Message supplied by the server, if the failure carried one
    pub fn server_message(&self) -> Option<&str> {
        match self {
            BackendError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Encounter store partitioned by owner.
///
/// Every call carries the owner id; implementations must not let one owner
/// observe or mutate another owner's encounters.
#[async_trait]
pub trait EncounterBackend: Send + Sync {
    /// Encounters of the owner with any of `statuses` (all when empty), most
    /// recently active first
    async fn list(
        &self,
        owner_id: &str,
        statuses: &[EncounterStatus],
    ) -> Result<Vec<Encounter>, BackendError>;

    /// Create a new active encounter
    async fn create(&self, owner_id: &str, state: EncounterState) -> Result<Encounter, BackendError>;

    /// Pause an active encounter, replacing its state with `state`
    async fn pause(
        &self,
        owner_id: &str,
        encounter_id: &str,
        state: EncounterState,
    ) -> Result<Encounter, BackendError>;

    /// Reactivate a paused encounter
    async fn resume(&self, owner_id: &str, encounter_id: &str) -> Result<Encounter, BackendError>;

    /// Finalise an encounter
    async fn complete(&self, owner_id: &str, encounter_id: &str)
        -> Result<Encounter, BackendError>;

    /// Latest active-or-paused encounter, `None` when there is none
    async fn active(&self, owner_id: &str) -> Result<Option<Encounter>, BackendError>;

    async fn get(&self, owner_id: &str, encounter_id: &str) -> Result<Encounter, BackendError>;

    /// Append a conversation message to an active encounter
    async fn append_message(
        &self,
        owner_id: &str,
        encounter_id: &str,
        message: NewMessage,
    ) -> Result<Encounter, BackendError>;
}
