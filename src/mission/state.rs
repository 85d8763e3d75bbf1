//! Mission state and its durable JSON store.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigOverrides;
use crate::reflection::LoopGuard;

use super::history::StepHistory;

/// Lifecycle of a mission. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    fn can_become(&self, next: MissionStatus) -> bool {
        match self {
            Self::Created => next == Self::Running,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{}", label)
    }
}

/// Mission state errors.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Mission not found: {0}")]
    NotFound(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: MissionStatus,
        to: MissionStatus,
    },
}

/// One end-to-end attempt at a goal. Owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub goal: String,
    pub status: MissionStatus,
    pub step_count: u32,
    pub max_steps: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Overrides submitted with the goal; reapplied on resume.
    #[serde(default)]
    pub overrides: ConfigOverrides,
    pub history: StepHistory,
    #[serde(default)]
    pub last_error: Option<String>,
    /// The loop guard fired on the last step; the next step starts with
    /// emergency skills.
    #[serde(default)]
    pub pending_loop_signal: bool,
    /// Consecutive steps that failed on transport.
    #[serde(default)]
    pub transport_failures: u32,
    /// Loop evidence gathered so far, carried across resumes.
    #[serde(default)]
    pub loop_guard: Option<LoopGuard>,
    /// Set once the mission terminates.
    #[serde(default)]
    pub summary: Option<String>,
}

impl Mission {
    pub fn new(goal: impl Into<String>, max_steps: u32, history_depth: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            status: MissionStatus::Created,
            step_count: 0,
            max_steps,
            started_at: now,
            updated_at: now,
            overrides: ConfigOverrides::default(),
            history: StepHistory::new(history_depth),
            last_error: None,
            pending_loop_signal: false,
            transport_failures: 0,
            loop_guard: None,
            summary: None,
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: MissionStatus) -> Result<(), StateError> {
        if !self.status.can_become(next) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::info!("Mission {} {} -> {}", self.id, self.status, next);
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One JSON file per mission under a directory.
#[derive(Debug, Clone)]
pub struct MissionStore {
    dir: PathBuf,
}

impl MissionStore {
    /// Open (and create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StateError::IoError(e.to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf, StateError> {
        // Ids are uuids; anything else could escape the directory
        let id = Uuid::parse_str(id).map_err(|_| StateError::NotFound(id.to_string()))?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Write the mission, replacing any previous state atomically.
    pub fn save(&self, mission: &Mission) -> Result<(), StateError> {
        let path = self.path(&mission.id)?;
        let content = serde_json::to_string_pretty(mission)
            .map_err(|e| StateError::SerializeError(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| StateError::IoError(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| StateError::IoError(e.to_string()))
    }

    pub fn load(&self, id: &str) -> Result<Mission, StateError> {
        let path = self.path(id)?;
        if !path.exists() {
            return Err(StateError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path).map_err(|e| StateError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StateError::ParseError(e.to_string()))
    }

    /// Every readable mission, newest first.
    pub fn list(&self) -> Result<Vec<Mission>, StateError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StateError::IoError(e.to_string()))?;
        let mut missions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<Mission>(&c).map_err(|e| e.to_string()))
            {
                Ok(mission) => missions.push(mission),
                Err(err) => tracing::warn!("Skipping unreadable mission {}: {}", path.display(), err),
            }
        }
        missions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(missions)
    }
}
