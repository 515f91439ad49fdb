//! Encounter lifecycle manager
//!
//! Client-side state machine for one owner's consultation session:
//!
//! ```text
//! NONE --start--> ACTIVE --pause--> (NONE, listed as PAUSED) --resume--> ACTIVE
//!   ^                                                                     |
//!   +------------------------------complete-------------------------------+
//! ```
//!
//! The authoritative state lives in the backend, so a paused encounter can be
//! resumed after a reload through [`EncounterManager::get_active_encounter`]
//! or the paused listing. Local caches (current encounter, paused list) are
//! only touched after a successful backend response.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, EncounterBackend};
use crate::encounter::{Encounter, EncounterState, EncounterStatus, NewMessage};

/// Manager shared between tasks of one user session
pub type SharedEncounterManager<B> = Arc<Mutex<EncounterManager<B>>>;

/// Errors surfaced by lifecycle operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    /// A required identifier was missing or a snapshot was malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not legal for the cached encounter state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The backend call failed
    #[error("Failed to {operation} encounter{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    Transport {
        operation: &'static str,
        /// Message returned by the server, when there was one
        message: Option<String>,
        source: BackendError,
    },
}

impl LifecycleError {
    fn transport(operation: &'static str, source: BackendError) -> Self {
        LifecycleError::Transport {
            operation,
            message: source.server_message().map(str::to_string),
            source,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, LifecycleError::Transport { .. })
    }
}

/// Where the client currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// No encounter cached
    None,
    Active,
    /// A rehydrated encounter that is waiting to be resumed
    Paused,
}

/// Snapshot for display code
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub phase: LifecyclePhase,
    pub encounter_id: Option<String>,
    pub step: Option<String>,
    /// Recording time of the current encounter, formatted
    pub elapsed: String,
    pub paused_count: usize,
    pub error_message: Option<String>,
}

/// Lifecycle manager for a single owner
pub struct EncounterManager<B: EncounterBackend> {
    backend: B,
    owner_id: Option<String>,
    current: Option<Encounter>,
    paused: Vec<Encounter>,
    last_error: Option<LifecycleError>,
}

impl<B: EncounterBackend> EncounterManager<B> {
    pub fn new(backend: B, owner_id: Option<String>) -> Self {
        Self {
            backend,
            owner_id: owner_id.filter(|id| !id.trim().is_empty()),
            current: None,
            paused: Vec::new(),
            last_error: None,
        }
    }

    /// Wrap in the shared handle used across tasks
    pub fn into_shared(self) -> SharedEncounterManager<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Switch identity; caches belong to the previous owner and are dropped
    pub fn set_owner(&mut self, owner_id: Option<String>) {
        let owner_id = owner_id.filter(|id| !id.trim().is_empty());
        if owner_id != self.owner_id {
            info!("Encounter manager switching owner");
            self.owner_id = owner_id;
            self.current = None;
            self.paused.clear();
            self.last_error = None;
        }
    }

    /// Cached current encounter
    pub fn current(&self) -> Option<&Encounter> {
        self.current.as_ref()
    }

    /// Cached paused encounters
    pub fn paused_encounters(&self) -> &[Encounter] {
        &self.paused
    }

    /// Error from the most recent operation, cleared when the next one starts
    pub fn last_error(&self) -> Option<&LifecycleError> {
        self.last_error.as_ref()
    }

    pub fn status(&self) -> ManagerStatus {
        let phase = match self.current.as_ref().map(|e| e.status) {
            Some(EncounterStatus::Active) => LifecyclePhase::Active,
            Some(EncounterStatus::Paused) => LifecyclePhase::Paused,
            Some(EncounterStatus::Completed) | None => LifecyclePhase::None,
        };

        ManagerStatus {
            phase,
            encounter_id: self.current.as_ref().map(|e| e.id.clone()),
            step: self.current.as_ref().and_then(|e| e.state.step.clone()),
            elapsed: self
                .current
                .as_ref()
                .map(|e| e.state.recording_display())
                .unwrap_or_else(|| crate::duration::format_duration(None)),
            paused_count: self.paused.len(),
            error_message: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn require_owner(&self) -> Result<String, LifecycleError> {
        self.owner_id
            .clone()
            .ok_or_else(|| LifecycleError::Validation("owner id is required".into()))
    }

    fn settle<T>(&mut self, result: Result<T, LifecycleError>) -> Result<T, LifecycleError> {
        if let Err(ref e) = result {
            warn!("Encounter operation failed: {}", e);
            self.last_error = Some(e.clone());
        }
        result
    }

    /// Start a new encounter with `initial_state` (empty when `None`)
    pub async fn start(
        &mut self,
        initial_state: Option<EncounterState>,
    ) -> Result<Encounter, LifecycleError> {
        self.last_error = None;
        let result = self.start_inner(initial_state.unwrap_or_default()).await;
        self.settle(result)
    }

    async fn start_inner(&mut self, state: EncounterState) -> Result<Encounter, LifecycleError> {
        let owner = self.require_owner()?;
        state
            .validate()
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;

        let encounter = self
            .backend
            .create(&owner, state)
            .await
            .map_err(|e| LifecycleError::transport("start", e))?;

        info!("Encounter {} transitioning to Active", encounter.id);
        self.current = Some(encounter.clone());
        Ok(encounter)
    }

    /// Snapshot `state` to the backend and move the current encounter to paused
    pub async fn pause(&mut self, state: EncounterState) -> Result<Encounter, LifecycleError> {
        self.last_error = None;
        let result = self.pause_inner(state).await;
        self.settle(result)
    }

    async fn pause_inner(&mut self, state: EncounterState) -> Result<Encounter, LifecycleError> {
        let encounter_id = match self.current {
            Some(ref current) if current.is_active() => current.id.clone(),
            _ => {
                return Err(LifecycleError::InvalidState(
                    "no active encounter to pause".into(),
                ))
            }
        };
        let owner = self.require_owner()?;
        state
            .validate()
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;

        let paused = self
            .backend
            .pause(&owner, &encounter_id, state)
            .await
            .map_err(|e| LifecycleError::transport("pause", e))?;

        info!("Encounter {} transitioning to Paused", paused.id);
        self.current = None;
        self.refresh_paused_after_pause(&owner, &paused).await;
        Ok(paused)
    }

    /// The pause already succeeded, so a failed refresh only degrades the list
    async fn refresh_paused_after_pause(&mut self, owner: &str, paused: &Encounter) {
        match self.backend.list(owner, &[EncounterStatus::Paused]).await {
            Ok(encounters) => self.paused = encounters,
            Err(e) => {
                warn!("Failed to refresh paused encounters after pause: {}", e);
                self.paused.retain(|p| p.id != paused.id);
                self.paused.insert(0, paused.clone());
            }
        }
    }

    /// Reactivate a paused encounter and restore its state
    pub async fn resume(&mut self, encounter_id: &str) -> Result<Encounter, LifecycleError> {
        self.last_error = None;
        let result = self.resume_inner(encounter_id).await;
        self.settle(result)
    }

    async fn resume_inner(&mut self, encounter_id: &str) -> Result<Encounter, LifecycleError> {
        let owner = self.require_owner()?;
        if encounter_id.trim().is_empty() {
            return Err(LifecycleError::Validation("encounter id is required".into()));
        }

        let resumed = self
            .backend
            .resume(&owner, encounter_id)
            .await
            .map_err(|e| LifecycleError::transport("resume", e))?;

        info!("Encounter {} transitioning to Active (resumed)", resumed.id);
        self.paused.retain(|p| p.id != encounter_id);
        self.current = Some(resumed.clone());
        Ok(resumed)
    }

    /// Finalise the cached encounter, whatever its status
    pub async fn complete(&mut self) -> Result<Encounter, LifecycleError> {
        self.last_error = None;
        let result = self.complete_inner().await;
        self.settle(result)
    }

    async fn complete_inner(&mut self) -> Result<Encounter, LifecycleError> {
        let encounter_id = match self.current {
            Some(ref current) => current.id.clone(),
            None => {
                return Err(LifecycleError::InvalidState(
                    "no encounter to complete".into(),
                ))
            }
        };
        let owner = self.require_owner()?;

        let completed = self
            .backend
            .complete(&owner, &encounter_id)
            .await
            .map_err(|e| LifecycleError::transport("complete", e))?;

        info!("Encounter {} transitioning to Completed", completed.id);
        self.current = None;
        self.paused.retain(|p| p.id != encounter_id);
        Ok(completed)
    }

    /// Replace the cached paused list with the backend's view.
    ///
    /// Without an owner this is a no-op returning the (empty) cache, so guest
    /// render paths can call it unconditionally.
    pub async fn fetch_paused_encounters(&mut self) -> Result<Vec<Encounter>, LifecycleError> {
        self.last_error = None;
        let owner = match self.owner_id.clone() {
            Some(owner) => owner,
            None => {
                debug!("No owner, skipping paused encounter fetch");
                return Ok(self.paused.clone());
            }
        };

        let result = self
            .backend
            .list(&owner, &[EncounterStatus::Paused])
            .await
            .map_err(|e| LifecycleError::transport("list paused", e));

        match self.settle(result) {
            Ok(encounters) => {
                debug!("Fetched {} paused encounters", encounters.len());
                self.paused = encounters;
                Ok(self.paused.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Rehydrate the current encounter after a reload.
    ///
    /// Returns `None` without an owner or when the backend has no active or
    /// paused encounter; neither case is an error.
    pub async fn get_active_encounter(&mut self) -> Result<Option<Encounter>, LifecycleError> {
        self.last_error = None;
        let owner = match self.owner_id.clone() {
            Some(owner) => owner,
            None => return Ok(None),
        };

        let result = self
            .backend
            .active(&owner)
            .await
            .map_err(|e| LifecycleError::transport("load active", e));

        let found = self.settle(result)?;
        if let Some(ref encounter) = found {
            info!(
                "Rehydrated encounter {} ({})",
                encounter.id, encounter.status
            );
            self.current = Some(encounter.clone());
        }
        Ok(found)
    }

    /// Append a conversation message to the active encounter
    pub async fn record_message(&mut self, message: NewMessage) -> Result<Encounter, LifecycleError> {
        self.last_error = None;
        let result = self.record_message_inner(message).await;
        self.settle(result)
    }

    async fn record_message_inner(&mut self, message: NewMessage) -> Result<Encounter, LifecycleError> {
        let encounter_id = match self.current {
            Some(ref current) if current.is_active() => current.id.clone(),
            _ => {
                return Err(LifecycleError::InvalidState(
                    "no active encounter to record a message on".into(),
                ))
            }
        };
        let owner = self.require_owner()?;

        let updated = self
            .backend
            .append_message(&owner, &encounter_id, message)
            .await
            .map_err(|e| LifecycleError::transport("record message on", e))?;

        debug!(
            "Encounter {} now holds {} messages",
            updated.id,
            updated.state.messages.len()
        );
        self.current = Some(updated.clone());
        Ok(updated)
    }

    /// Re-read the cached encounter from the backend
    pub async fn refresh_current(&mut self) -> Result<Option<Encounter>, LifecycleError> {
        self.last_error = None;
        let encounter_id = match self.current {
            Some(ref current) => current.id.clone(),
            None => return Ok(None),
        };
        let owner = match self.require_owner() {
            Ok(owner) => owner,
            Err(e) => return self.settle(Err(e)),
        };

        let result = self
            .backend
            .get(&owner, &encounter_id)
            .await
            .map_err(|e| LifecycleError::transport("refresh", e));

        let encounter = self.settle(result)?;
        self.current = match encounter.status {
            EncounterStatus::Completed => None,
            _ => Some(encounter.clone()),
        };
        Ok(Some(encounter))
    }
}
