//! Encounter model shared by the lifecycle manager and the backend service

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::duration::{compute_duration_seconds, format_duration};

/// Lifecycle status of an encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncounterStatus {
    Active,
    Paused,
    Completed,
}

impl EncounterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncounterStatus::Active => "active",
            EncounterStatus::Paused => "paused",
            EncounterStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for EncounterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncounterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EncounterStatus::Active),
            "paused" => Ok(EncounterStatus::Paused),
            "completed" => Ok(EncounterStatus::Completed),
            other => Err(format!("Unknown encounter status: {}", other)),
        }
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

/// A message recorded against an encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Request body for appending a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default, alias = "flow_step", skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Keys merged into the nested `context` object of the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role,
            step: None,
            context: None,
        }
    }
}

/// Rejections raised by [`EncounterState::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateValidationError {
    #[error("recordingTime must be a finite, non-negative number of seconds (got {0})")]
    InvalidRecordingTime(f64),

    #[error("audio chunk {index} is not valid base64")]
    InvalidAudioChunk { index: usize },
}

/// Session snapshot carried by an encounter.
///
/// Named fields are the ones the recorder writes; anything else survives in
/// `extra` untouched so newer clients can round-trip fields this crate does
/// not know about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Elapsed recording seconds as counted by the recorder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_time: Option<f64>,
    /// Base64-encoded audio fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_chunks: Vec<String>,
    /// Speaker id to display label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub speaker_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<EncounterMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EncounterState {
    /// Check the snapshot before it crosses a process boundary
    pub fn validate(&self) -> Result<(), StateValidationError> {
        if let Some(seconds) = self.recording_time {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(StateValidationError::InvalidRecordingTime(seconds));
            }
        }

        for (index, chunk) in self.audio_chunks.iter().enumerate() {
            if STANDARD.decode(chunk.as_bytes()).is_err() {
                return Err(StateValidationError::InvalidAudioChunk { index });
            }
        }

        Ok(())
    }

    /// Recorder counter reconciled to whole seconds
    pub fn recording_seconds(&self) -> Option<u64> {
        compute_duration_seconds(None, None, self.recording_time)
    }

    /// Recorder counter rendered for display
    pub fn recording_display(&self) -> String {
        format_duration(self.recording_time)
    }
}

/// A consultation recording session tracked through active, paused and
/// completed states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    #[serde(rename = "user_id", alias = "owner_id")]
    pub owner_id: String,
    pub status: EncounterStatus,
    #[serde(default)]
    pub state: EncounterState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Encounter {
    /// Create a fresh active encounter
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, state: EncounterState) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            status: EncounterStatus::Active,
            state,
            created_at: now,
            updated_at: now,
            paused_at: None,
            resumed_at: None,
            last_activity_at: Some(now),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EncounterStatus::Active
    }

    pub fn is_paused(&self) -> bool {
        self.status == EncounterStatus::Paused
    }

    /// Whether the encounter was ever paused during its lifetime
    pub fn was_paused(&self) -> bool {
        self.paused_at.is_some()
    }
}
