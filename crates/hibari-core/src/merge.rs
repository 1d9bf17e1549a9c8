//! Library entry collision handling.
//!
//! When an imported entry lands on a mapping set that already has a local
//! entry, the configured [`ImportPolicy`] decides what survives. The
//! field-wise merge takes the more recently updated side per field, but an
//! empty winning value loses to a filled one: remotes report zero/empty
//! for fields the user never set there, and trusting recency alone would
//! erase locally-authored data the remote never had a chance to express.

use serde::{Deserialize, Serialize};

use crate::models::{EntryStatus, LibraryEntry, Progress};

/// Collision policy applied during library import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportPolicy {
    /// Discard the incoming entry; keep the local one unchanged.
    Keep,
    /// Replace the local entry with the incoming values, rehomed.
    Overwrite,
    /// Keep whichever whole entry was updated more recently.
    Latest,
    /// Field-wise merge, latest wins, empty loses.
    Merge,
}

impl ImportPolicy {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Overwrite => "overwrite",
            Self::Latest => "latest",
            Self::Merge => "merge",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "keep" => Some(Self::Keep),
            "overwrite" => Some(Self::Overwrite),
            "latest" => Some(Self::Latest),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }

    pub const ALL: &[ImportPolicy] = &[Self::Keep, Self::Overwrite, Self::Latest, Self::Merge];
}

impl std::fmt::Display for ImportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Winner's value unless it is empty, then the loser's.
fn pick<T: Clone>(winner: &T, loser: &T, is_empty: impl Fn(&T) -> bool) -> T {
    if is_empty(winner) {
        loser.clone()
    } else {
        winner.clone()
    }
}

/// Field-wise merge of two entries believed to track the same media.
///
/// The more recently updated entry wins each field; an empty winning value
/// falls back to the other side. On an exact timestamp tie the existing
/// entry wins. The home mapping is always the existing entry's, favorite
/// is the OR of both sides, and sync bookkeeping (synced accounts, missed
/// syncs) stays with the existing entry: it is owned by the propagator,
/// not the merge.
pub fn merge_entries(existing: &LibraryEntry, incoming: &LibraryEntry) -> LibraryEntry {
    let (winner, loser) = if incoming.updated_at > existing.updated_at {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    LibraryEntry {
        home: existing.home.clone(),
        media_type: existing.media_type,
        favorite: existing.favorite || incoming.favorite,
        status: pick(&winner.status, &loser.status, |s| {
            *s == EntryStatus::NotStarted
        }),
        score: pick(&winner.score, &loser.score, Option::is_none),
        progress: pick(&winner.progress, &loser.progress, Progress::is_empty),
        restarts: pick(&winner.restarts, &loser.restarts, |r| *r == 0),
        started_at: pick(&winner.started_at, &loser.started_at, Option::is_none),
        finished_at: pick(&winner.finished_at, &loser.finished_at, Option::is_none),
        notes: pick(&winner.notes, &loser.notes, String::is_empty),
        private: winner.private || loser.private,
        updated_at: winner.updated_at,
        synced_accounts: existing.synced_accounts.clone(),
        missed_syncs: existing.missed_syncs.clone(),
    }
}

/// Resolve a collision between an existing local entry and an incoming
/// imported one. Whatever the policy picks, the result keeps the existing
/// entry's home mapping and sync bookkeeping, and the favorite flag is
/// the OR of both sides, so a favorite designation is never lost to an
/// import.
pub fn apply_policy(
    policy: ImportPolicy,
    existing: &LibraryEntry,
    incoming: &LibraryEntry,
) -> LibraryEntry {
    let mut resolved = match policy {
        ImportPolicy::Keep => existing.clone(),
        ImportPolicy::Overwrite => rehome(incoming, existing),
        ImportPolicy::Latest => {
            if incoming.updated_at > existing.updated_at {
                rehome(incoming, existing)
            } else {
                existing.clone()
            }
        }
        ImportPolicy::Merge => merge_entries(existing, incoming),
    };
    resolved.favorite = existing.favorite || incoming.favorite;
    resolved
}

/// The incoming entry's values under the existing entry's identity.
fn rehome(incoming: &LibraryEntry, existing: &LibraryEntry) -> LibraryEntry {
    LibraryEntry {
        home: existing.home.clone(),
        media_type: existing.media_type,
        synced_accounts: existing.synced_accounts.clone(),
        missed_syncs: existing.missed_syncs.clone(),
        ..incoming.clone()
    }
}
