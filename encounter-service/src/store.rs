//! Encounter store
//!
//! Encounters live in memory behind an async `RwLock`. When a snapshot path is
//! configured, every mutation rewrites the snapshot (temp file + rename) before
//! it is acknowledged; a failed write rolls the mutation back.

use chrono::Utc;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use encounter_session::{
    Encounter, EncounterMessage, EncounterState, EncounterStatus, NewMessage,
};

use crate::error::{ServiceError, ServiceResult};

/// State key holding merged message context
pub const CONTEXT_KEY: &str = "context";

pub struct EncounterStore {
    encounters: RwLock<HashMap<String, Encounter>>,
    snapshot_path: Option<PathBuf>,
}

/// Most recent activity first, then most recently created
fn sort_by_activity(encounters: &mut [Encounter]) {
    encounters.sort_by_key(|e| (Reverse(e.last_activity_at), Reverse(e.created_at)));
}

fn owned(
    encounters: &HashMap<String, Encounter>,
    owner_id: &str,
    encounter_id: &str,
) -> ServiceResult<Encounter> {
    match encounters.get(encounter_id) {
        None => Err(ServiceError::NotFound),
        Some(e) if e.owner_id != owner_id => Err(ServiceError::Forbidden),
        Some(e) => Ok(e.clone()),
    }
}

fn has_other_active(
    encounters: &HashMap<String, Encounter>,
    owner_id: &str,
    except_id: Option<&str>,
) -> bool {
    encounters
        .values()
        .any(|e| e.owner_id == owner_id && e.is_active() && Some(e.id.as_str()) != except_id)
}

impl EncounterStore {
    /// Store without persistence
    pub fn in_memory() -> Self {
        Self {
            encounters: RwLock::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Store backed by a snapshot file, loading it when present
    pub async fn open(snapshot_path: PathBuf) -> ServiceResult<Self> {
        let encounters = match tokio::fs::read_to_string(&snapshot_path).await {
            Ok(content) => {
                let list: Vec<Encounter> = serde_json::from_str(&content).map_err(|e| {
                    ServiceError::Persistence(format!(
                        "Failed to parse {}: {}",
                        snapshot_path.display(),
                        e
                    ))
                })?;
                list.into_iter().map(|e| (e.id.clone(), e)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(ServiceError::Persistence(format!(
                    "Failed to read {}: {}",
                    snapshot_path.display(),
                    e
                )))
            }
        };

        info!(
            "Loaded {} encounters from {}",
            encounters.len(),
            snapshot_path.display()
        );
        Ok(Self {
            encounters: RwLock::new(encounters),
            snapshot_path: Some(snapshot_path),
        })
    }

    pub async fn len(&self) -> usize {
        self.encounters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.encounters.read().await.is_empty()
    }

    async fn persist(&self, encounters: &HashMap<String, Encounter>) -> ServiceResult<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        write_snapshot(path, encounters)
            .await
            .map_err(|e| ServiceError::Persistence(e.to_string()))
    }

    /// Insert `updated`, persist, and roll back if the snapshot write fails
    async fn commit(
        &self,
        encounters: &mut HashMap<String, Encounter>,
        mut updated: Encounter,
    ) -> ServiceResult<Encounter> {
        updated.updated_at = Utc::now();
        let previous = encounters.insert(updated.id.clone(), updated.clone());

        if let Err(e) = self.persist(encounters).await {
            match previous {
                Some(previous) => {
                    encounters.insert(previous.id.clone(), previous);
                }
                None => {
                    encounters.remove(&updated.id);
                }
            }
            return Err(e);
        }
        Ok(updated)
    }

    pub async fn create(&self, owner_id: &str, state: EncounterState) -> ServiceResult<Encounter> {
        state.validate()?;
        let mut encounters = self.encounters.write().await;
        if has_other_active(&encounters, owner_id, None) {
            return Err(ServiceError::conflict("Owner already has an active encounter"));
        }

        let encounter = Encounter::new(Uuid::new_v4().to_string(), owner_id, state);
        let created = self.commit(&mut encounters, encounter).await?;
        info!("Encounter {} created for {}", created.id, owner_id);
        Ok(created)
    }

    /// Owner's encounters with any of `statuses` (all when empty)
    pub async fn list(&self, owner_id: &str, statuses: &[EncounterStatus]) -> Vec<Encounter> {
        let encounters = self.encounters.read().await;
        let mut matching: Vec<Encounter> = encounters
            .values()
            .filter(|e| e.owner_id == owner_id)
            .filter(|e| statuses.is_empty() || statuses.contains(&e.status))
            .cloned()
            .collect();
        sort_by_activity(&mut matching);
        matching
    }

    pub async fn get(&self, owner_id: &str, encounter_id: &str) -> ServiceResult<Encounter> {
        owned(&*self.encounters.read().await, owner_id, encounter_id)
    }

    pub async fn latest_active_or_paused(&self, owner_id: &str) -> Option<Encounter> {
        self.list(owner_id, &[EncounterStatus::Active, EncounterStatus::Paused])
            .await
            .into_iter()
            .next()
    }

    pub async fn pause(
        &self,
        owner_id: &str,
        encounter_id: &str,
        state: EncounterState,
    ) -> ServiceResult<Encounter> {
        let mut encounters = self.encounters.write().await;
        let mut encounter = owned(&encounters, owner_id, encounter_id)?;
        if !encounter.is_active() {
            return Err(ServiceError::conflict("Only active encounters can be paused"));
        }
        state.validate()?;

        let now = Utc::now();
        encounter.status = EncounterStatus::Paused;
        encounter.paused_at = Some(now);
        encounter.last_activity_at = Some(now);
        encounter.state = state;

        let paused = self.commit(&mut encounters, encounter).await?;
        info!("Encounter {} paused", paused.id);
        Ok(paused)
    }

    pub async fn resume(&self, owner_id: &str, encounter_id: &str) -> ServiceResult<Encounter> {
        let mut encounters = self.encounters.write().await;
        let mut encounter = owned(&encounters, owner_id, encounter_id)?;
        if !encounter.is_paused() {
            return Err(ServiceError::conflict("Only paused encounters can be resumed"));
        }
        if has_other_active(&encounters, owner_id, Some(encounter_id)) {
            return Err(ServiceError::conflict("Owner already has an active encounter"));
        }

        let now = Utc::now();
        encounter.status = EncounterStatus::Active;
        encounter.resumed_at = Some(now);
        encounter.last_activity_at = Some(now);

        let resumed = self.commit(&mut encounters, encounter).await?;
        info!("Encounter {} resumed", resumed.id);
        Ok(resumed)
    }

    pub async fn complete(&self, owner_id: &str, encounter_id: &str) -> ServiceResult<Encounter> {
        let mut encounters = self.encounters.write().await;
        let mut encounter = owned(&encounters, owner_id, encounter_id)?;
        if encounter.status == EncounterStatus::Completed {
            debug!("Encounter {} already completed", encounter_id);
            return Ok(encounter);
        }

        encounter.status = EncounterStatus::Completed;
        encounter.last_activity_at = Some(Utc::now());

        let completed = self.commit(&mut encounters, encounter).await?;
        info!("Encounter {} completed", completed.id);
        Ok(completed)
    }

    pub async fn append_message(
        &self,
        owner_id: &str,
        encounter_id: &str,
        message: NewMessage,
    ) -> ServiceResult<Encounter> {
        if message.content.trim().is_empty() {
            return Err(ServiceError::BadRequest("message content is required".into()));
        }

        let mut encounters = self.encounters.write().await;
        let mut encounter = owned(&encounters, owner_id, encounter_id)?;
        if !encounter.is_active() {
            return Err(ServiceError::conflict(
                "Cannot add messages unless encounter is active",
            ));
        }

        let now = Utc::now();
        encounter.state.messages.push(EncounterMessage {
            role: message.role,
            content: message.content,
            timestamp: now,
        });
        if let Some(step) = message.step {
            encounter.state.step = Some(step);
        }
        if let Some(context) = message.context {
            merge_context(&mut encounter.state, context);
        }
        encounter.state.validate()?;
        encounter.last_activity_at = Some(now);

        self.commit(&mut encounters, encounter).await
    }
}

/// Merge message context into the nested `context` object of the state, never
/// at the top level where it could shadow named fields
fn merge_context(state: &mut EncounterState, context: Map<String, Value>) {
    match state.extra.get_mut(CONTEXT_KEY) {
        Some(Value::Object(existing)) => existing.extend(context),
        _ => {
            state
                .extra
                .insert(CONTEXT_KEY.to_string(), Value::Object(context));
        }
    }
}

async fn write_snapshot(path: &Path, encounters: &HashMap<String, Encounter>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut list: Vec<&Encounter> = encounters.values().collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    let content = serde_json::to_vec_pretty(&list)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
