use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Mapping, MediaType};

/// User's tracking status for a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    NotStarted,
    Planned,
    InProgress,
    Paused,
    Dropped,
    Completed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::Planned => "Planned",
            Self::InProgress => "In Progress",
            Self::Paused => "Paused",
            Self::Dropped => "Dropped",
            Self::Completed => "Completed",
        }
    }

    /// Database string representation (lowercase, no spaces).
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Dropped => "dropped",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "planned" => Some(Self::Planned),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "dropped" => Some(Self::Dropped),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub const ALL: &[EntryStatus] = &[
        Self::NotStarted,
        Self::Planned,
        Self::InProgress,
        Self::Paused,
        Self::Dropped,
        Self::Completed,
    ];
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type progress counters. Anime uses episodes; manga uses chapters
/// and volumes. Unused counters stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub episodes: u32,
    pub chapters: u32,
    pub volumes: u32,
}

impl Progress {
    pub fn is_empty(&self) -> bool {
        self.episodes == 0 && self.chapters == 0 && self.volumes == 0
    }
}

/// Kind of sync operation that failed to reach a linked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Update,
    Removal,
}

/// A recorded, retryable failure to push a library change to one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedSync {
    pub account_id: i64,
    pub kind: SyncKind,
    pub at: DateTime<Utc>,
}

/// The user's tracking record for one real-world media item, keyed by its
/// home mapping. At most one entry exists per mapping set; lookups go
/// through the set, never the raw mapping alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub home: Mapping,
    pub media_type: MediaType,
    pub favorite: bool,
    pub status: EntryStatus,
    /// Normalized score, 0-100.
    pub score: Option<u8>,
    pub progress: Progress,
    pub restarts: u32,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub notes: String,
    pub private: bool,
    pub updated_at: DateTime<Utc>,
    /// Account ids presumed to already hold this entry's data remotely.
    pub synced_accounts: Vec<i64>,
    pub missed_syncs: Vec<MissedSync>,
}

impl LibraryEntry {
    /// A blank entry for a mapping, with everything unset.
    pub fn new(home: Mapping) -> Self {
        let media_type = home.media_type;
        Self {
            home,
            media_type,
            favorite: false,
            status: EntryStatus::NotStarted,
            score: None,
            progress: Progress::default(),
            restarts: 0,
            started_at: None,
            finished_at: None,
            notes: String::new(),
            private: false,
            updated_at: Utc::now(),
            synced_accounts: Vec::new(),
            missed_syncs: Vec::new(),
        }
    }
}
