use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::HibariError;
use crate::merge::{apply_policy, ImportPolicy};
use crate::models::{ExternalAccount, LibraryEntry, MediaType};
use crate::service::{LibraryItem, TrackerService};
use crate::storage::Storage;

/// Options controlling a library import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub policy: ImportPolicy,
    /// Only pull entries updated after this instant. Providers return
    /// pages newest-first, so the pull stops at the first stale page.
    pub since: Option<DateTime<Utc>>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            policy: ImportPolicy::Merge,
            since: None,
        }
    }
}

/// What an import did, page by page.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportReport {
    pub pages: u32,
    pub inserted: usize,
    pub merged: usize,
    pub skipped: usize,
}

/// Guards against two concurrent imports for the same account.
#[derive(Clone, Default)]
pub struct ImportLock {
    busy: Arc<Mutex<HashSet<i64>>>,
}

impl ImportLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the account for an import. `None` if one is already running.
    pub fn acquire(&self, account_id: i64) -> Option<ImportGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(account_id) {
            return None;
        }
        Some(ImportGuard {
            account_id,
            busy: Arc::clone(&self.busy),
        })
    }
}

/// Releases the account slot on drop, panics included.
pub struct ImportGuard {
    account_id: i64,
    busy: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.account_id);
    }
}

/// Pull the account's remote library page by page and fold it into
/// local storage.
///
/// Each page commits before the next is fetched, so a failed fetch is
/// returned as an error while everything already pulled stays in
/// storage. Remote entries whose mapping set
/// already holds a local entry go through the configured policy; the
/// rest are batch-inserted.
pub async fn import_library<S: TrackerService>(
    storage: &Storage,
    service: &S,
    account: &ExternalAccount,
    media_type: MediaType,
    options: &ImportOptions,
) -> Result<ImportReport, HibariError> {
    let mut report = ImportReport::default();
    let mut page: u32 = 1;

    info!(
        account_id = account.id,
        provider = %account.provider,
        media_type = %media_type,
        policy = %options.policy,
        "starting library import"
    );

    loop {
        let remote = match service.library_page(account, media_type, page).await {
            Ok(remote) => remote,
            Err(e) => {
                // Pages already written stay committed.
                warn!(page, pages_kept = report.pages, "import aborted mid-pull: {e}");
                return Err(e.into());
            }
        };
        report.pages += 1;

        let mut fresh: Vec<LibraryEntry> = Vec::new();
        let mut reconciled: Vec<LibraryEntry> = Vec::new();
        let mut stale_reached = false;

        for item in &remote.items {
            if let Some(since) = options.since {
                if item.entry.updated_at <= since {
                    // Pages are sorted newest-first, nothing older matters.
                    stale_reached = true;
                    break;
                }
            }
            match ingest_item(storage, item, options.policy)? {
                Ingested::Fresh(entry) => fresh.push(entry),
                Ingested::Reconciled(entry) => reconciled.push(entry),
                Ingested::Unchanged => report.skipped += 1,
            }
        }

        let added = storage.bulk_add_entries(&fresh)?;
        report.inserted += added.inserted;
        // A collision here means two remote items on one page resolved to
        // entries with the same home mapping; first one wins.
        report.skipped += added.collisions.len();

        storage.bulk_upsert_entries(&reconciled)?;
        report.merged += reconciled.len();

        debug!(
            page,
            inserted = added.inserted,
            merged = reconciled.len(),
            "import page committed"
        );

        if stale_reached || !remote.has_next {
            break;
        }
        page += 1;
    }

    info!(
        pages = report.pages,
        inserted = report.inserted,
        merged = report.merged,
        skipped = report.skipped,
        "library import finished"
    );
    Ok(report)
}

enum Ingested {
    Fresh(LibraryEntry),
    Reconciled(LibraryEntry),
    Unchanged,
}

/// Resolve one remote item against storage: register its mappings,
/// persist the media snapshot, and decide what to do with the entry.
fn ingest_item(
    storage: &Storage,
    item: &LibraryItem,
    policy: ImportPolicy,
) -> Result<Ingested, HibariError> {
    let set = storage.resolve_mappings(&item.mappings)?;
    storage.upsert_media_record(&item.media)?;

    match storage.entry_for_set(set.id)? {
        Some(existing) => {
            if policy == ImportPolicy::Keep && !item.entry.favorite {
                // Nothing of the incoming entry can change the local one.
                return Ok(Ingested::Unchanged);
            }
            let resolved = apply_policy(policy, &existing, &item.entry);
            Ok(Ingested::Reconciled(resolved))
        }
        None => Ok(Ingested::Fresh(item.entry.clone())),
    }
}
