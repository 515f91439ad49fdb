//! Report drafts and the local report archive
//!
//! A draft is derived from a finished encounter. Drafts are archived as JSON
//! under `<archive>/YYYY/MM/DD/<encounter_id>.json`, keyed by completion date.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::duration::{compute_duration_seconds, format_seconds, TimeInput, UNKNOWN_DURATION};
use crate::encounter::Encounter;

/// Draft consultation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub encounter_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub transcript: Option<String>,
    #[serde(default)]
    pub speaker_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub was_paused: bool,
    /// `None` when no source could establish the length
    pub duration_seconds: Option<u64>,
    pub duration_display: String,
}

impl ReportDraft {
    /// Build a draft from the final encounter.
    ///
    /// `start`/`end` is the recorder's wall-clock window. It only counts for
    /// encounters that were never paused; otherwise it would include the
    /// paused interval and the `recordingTime` counter is used instead.
    pub fn from_encounter(
        encounter: &Encounter,
        start: Option<TimeInput>,
        end: Option<TimeInput>,
    ) -> Self {
        let was_paused = encounter.was_paused();
        let counter = encounter.state.recording_time;

        let duration_seconds = if was_paused {
            compute_duration_seconds(None, None, counter)
        } else {
            compute_duration_seconds(start, end, counter)
        };

        Self {
            encounter_id: encounter.id.clone(),
            owner_id: encounter.owner_id.clone(),
            created_at: encounter.created_at,
            completed_at: encounter.updated_at,
            transcript: encounter.state.transcript.clone(),
            speaker_labels: encounter.state.speaker_labels.clone(),
            message_count: encounter.state.messages.len(),
            was_paused,
            duration_seconds,
            duration_display: duration_seconds
                .map(format_seconds)
                .unwrap_or_else(|| UNKNOWN_DURATION.to_string()),
        }
    }

    pub fn word_count(&self) -> usize {
        self.transcript
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }
}

fn date_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
}

/// Write a draft to the archive, returning the file path
pub fn save_report(base: &Path, draft: &ReportDraft) -> Result<PathBuf> {
    let dir = date_dir(base, draft.completed_at.date_naive());
    fs::create_dir_all(&dir).context("Failed to create archive directory")?;

    let path = dir.join(format!("{}.json", draft.encounter_id));
    let content = serde_json::to_string_pretty(draft).context("Failed to serialize report")?;
    fs::write(&path, content).context("Failed to write report")?;

    info!(
        encounter_id = %draft.encounter_id,
        duration = %draft.duration_display,
        path = %path.display(),
        "Report draft archived"
    );
    Ok(path)
}

/// Load one archived draft
pub fn load_report(base: &Path, encounter_id: &str, date: NaiveDate) -> Result<ReportDraft> {
    let path = date_dir(base, date).join(format!("{}.json", encounter_id));
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Report not found: {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse report")
}

/// Drafts archived on `date`, oldest completion first
pub fn list_reports(base: &Path, date: NaiveDate) -> Result<Vec<ReportDraft>> {
    let dir = date_dir(base, date);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(&dir).context("Failed to read archive directory")? {
        let path = entry.context("Failed to read archive entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        // Skip unreadable files instead of failing the whole listing
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str::<ReportDraft>(&content).map_err(Into::into))
        {
            Ok(report) => reports.push(report),
            Err(e) => warn!("Skipping unreadable report {}: {}", path.display(), e),
        }
    }

    reports.sort_by_key(|r| r.completed_at);
    debug!("Found {} reports for {}", reports.len(), date);
    Ok(reports)
}
