use chrono::Utc;
use tracing::{debug, warn};

use crate::error::HibariError;
use crate::models::{LibraryEntry, Mapping, MissedSync, SyncKind};
use crate::service::{ServiceRegistry, TrackerService};
use crate::storage::Storage;

/// Push a changed entry to every linked account syncing its media type.
///
/// Accounts are attempted independently; one failing never blocks the
/// rest. A failed push is recorded as a missed sync (at most one pending
/// update per account, the latest wins) and a terminal auth failure
/// additionally marks the account's credentials invalid. The entry is
/// persisted once, after all accounts have been tried.
pub async fn propagate_update<R: ServiceRegistry>(
    storage: &Storage,
    registry: &R,
    entry: &LibraryEntry,
    mappings: &[Mapping],
) -> Result<LibraryEntry, HibariError> {
    let mut updated = entry.clone();

    for account in storage.get_accounts()? {
        if !account.syncs(entry.media_type) {
            continue;
        }
        let Some(service) = registry.service_for(account.provider) else {
            debug!(account_id = account.id, provider = %account.provider, "provider not configured, skipping push");
            record_miss(&mut updated, account.id, SyncKind::Update);
            continue;
        };

        match service.update_entry(&account, entry, mappings).await {
            Ok(()) => {
                clear_misses(&mut updated, account.id);
                if !updated.synced_accounts.contains(&account.id) {
                    updated.synced_accounts.push(account.id);
                }
                debug!(account_id = account.id, "entry pushed");
            }
            Err(e) => {
                warn!(account_id = account.id, "push failed: {e}");
                record_miss(&mut updated, account.id, SyncKind::Update);
                if e.is_auth() {
                    storage.set_account_auth_valid(account.id, false)?;
                }
            }
        }
    }

    storage.upsert_library_entry(&updated)?;
    Ok(updated)
}

/// Remove an entry from every account it was synced to, then delete it
/// locally.
///
/// If any remote delete fails, the entry stays in storage as a tombstone
/// carrying a removal miss per failed account, so the delete can be
/// replayed later.
pub async fn propagate_removal<R: ServiceRegistry>(
    storage: &Storage,
    registry: &R,
    entry: &LibraryEntry,
    mappings: &[Mapping],
) -> Result<(), HibariError> {
    let mut tombstone = entry.clone();

    for account_id in entry.synced_accounts.clone() {
        let Some(account) = storage.get_account(account_id)? else {
            // Account was unlinked; nothing remote left to remove.
            tombstone.synced_accounts.retain(|id| *id != account_id);
            continue;
        };
        let Some(service) = registry.service_for(account.provider) else {
            record_miss(&mut tombstone, account_id, SyncKind::Removal);
            continue;
        };

        match service.remove_entry(&account, entry.media_type, mappings).await {
            Ok(()) => {
                tombstone.synced_accounts.retain(|id| *id != account_id);
                clear_misses(&mut tombstone, account_id);
            }
            Err(e) => {
                warn!(account_id, "remote delete failed: {e}");
                record_miss(&mut tombstone, account_id, SyncKind::Removal);
                if e.is_auth() {
                    storage.set_account_auth_valid(account_id, false)?;
                }
            }
        }
    }

    let pending_removals = tombstone
        .missed_syncs
        .iter()
        .any(|m| m.kind == SyncKind::Removal);
    if pending_removals {
        storage.upsert_library_entry(&tombstone)?;
    } else {
        storage.delete_library_entry(&entry.home)?;
    }
    Ok(())
}

/// Replay the entry's missed syncs against their accounts.
///
/// Pending updates are re-pushed and pending removals re-deleted; misses
/// that succeed are cleared. If the last pending removal clears and no
/// account holds the entry any more, the local tombstone is deleted.
pub async fn flush_missed_syncs<R: ServiceRegistry>(
    storage: &Storage,
    registry: &R,
    entry: &LibraryEntry,
    mappings: &[Mapping],
) -> Result<Option<LibraryEntry>, HibariError> {
    let mut updated = entry.clone();

    for miss in entry.missed_syncs.clone() {
        let Some(account) = storage.get_account(miss.account_id)? else {
            clear_misses(&mut updated, miss.account_id);
            continue;
        };
        if !account.auth_valid {
            continue;
        }
        let Some(service) = registry.service_for(account.provider) else {
            continue;
        };

        let result = match miss.kind {
            SyncKind::Update => service.update_entry(&account, entry, mappings).await,
            SyncKind::Removal => service.remove_entry(&account, entry.media_type, mappings).await,
        };
        match result {
            Ok(()) => {
                clear_misses(&mut updated, miss.account_id);
                match miss.kind {
                    SyncKind::Update => {
                        if !updated.synced_accounts.contains(&miss.account_id) {
                            updated.synced_accounts.push(miss.account_id);
                        }
                    }
                    SyncKind::Removal => {
                        updated.synced_accounts.retain(|id| *id != miss.account_id);
                    }
                }
            }
            Err(e) => {
                warn!(account_id = miss.account_id, "missed sync replay failed: {e}");
                if e.is_auth() {
                    storage.set_account_auth_valid(miss.account_id, false)?;
                }
            }
        }
    }

    let was_tombstone = entry.missed_syncs.iter().any(|m| m.kind == SyncKind::Removal);
    if was_tombstone && updated.missed_syncs.is_empty() && updated.synced_accounts.is_empty() {
        storage.delete_library_entry(&entry.home)?;
        return Ok(None);
    }
    storage.upsert_library_entry(&updated)?;
    Ok(Some(updated))
}

fn record_miss(entry: &mut LibraryEntry, account_id: i64, kind: SyncKind) {
    // One pending miss per account, the most recent wins.
    entry.missed_syncs.retain(|m| m.account_id != account_id);
    entry.missed_syncs.push(MissedSync {
        account_id,
        kind,
        at: Utc::now(),
    });
}

fn clear_misses(entry: &mut LibraryEntry, account_id: i64) {
    entry.missed_syncs.retain(|m| m.account_id != account_id);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::{ExternalAccount, MediaType, Provider};
    use crate::service::{LibraryPage, MediaHit, RemoteUser, ServiceError, TrackerService};

    /// Records pushed and removed entries; fails for configured accounts.
    #[derive(Default)]
    struct PushRecorder {
        fail_accounts: Vec<i64>,
        auth_fail_accounts: Vec<i64>,
        pushed: Mutex<Vec<i64>>,
        removed: Mutex<Vec<i64>>,
    }

    impl PushRecorder {
        fn outcome(&self, account_id: i64) -> Result<(), ServiceError> {
            if self.auth_fail_accounts.contains(&account_id) {
                return Err(ServiceError::Auth("token revoked".into()));
            }
            if self.fail_accounts.contains(&account_id) {
                return Err(ServiceError::Http("timed out".into()));
            }
            Ok(())
        }
    }

    impl TrackerService for PushRecorder {
        fn search(
            &self,
            _media_type: MediaType,
            _query: &str,
        ) -> impl std::future::Future<Output = Result<Vec<MediaHit>, ServiceError>> + Send {
            async { Ok(Vec::new()) }
        }

        fn get_media(
            &self,
            _media_type: MediaType,
            _remote_id: &str,
        ) -> impl std::future::Future<Output = Result<MediaHit, ServiceError>> + Send {
            async { Err(ServiceError::Http("not wired".into())) }
        }

        fn library_page(
            &self,
            _account: &ExternalAccount,
            _media_type: MediaType,
            _page: u32,
        ) -> impl std::future::Future<Output = Result<LibraryPage, ServiceError>> + Send {
            async {
                Ok(LibraryPage {
                    items: Vec::new(),
                    has_next: false,
                })
            }
        }

        fn get_user(
            &self,
            _account: &ExternalAccount,
        ) -> impl std::future::Future<Output = Result<RemoteUser, ServiceError>> + Send {
            async { Err(ServiceError::Http("not wired".into())) }
        }

        fn update_entry(
            &self,
            account: &ExternalAccount,
            _entry: &LibraryEntry,
            _mappings: &[Mapping],
        ) -> impl std::future::Future<Output = Result<(), ServiceError>> + Send {
            let outcome = self.outcome(account.id);
            if outcome.is_ok() {
                self.pushed.lock().unwrap().push(account.id);
            }
            async move { outcome }
        }

        fn remove_entry(
            &self,
            account: &ExternalAccount,
            _media_type: MediaType,
            _mappings: &[Mapping],
        ) -> impl std::future::Future<Output = Result<(), ServiceError>> + Send {
            let outcome = self.outcome(account.id);
            if outcome.is_ok() {
                self.removed.lock().unwrap().push(account.id);
            }
            async move { outcome }
        }
    }

    struct OneServiceRegistry {
        service: PushRecorder,
    }

    impl ServiceRegistry for OneServiceRegistry {
        type Service = PushRecorder;

        fn service_for(&self, _provider: Provider) -> Option<&PushRecorder> {
            Some(&self.service)
        }
    }

    fn link_account(db: &Storage, provider: Provider) -> i64 {
        db.insert_account(&ExternalAccount {
            id: 0,
            provider,
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
            remote_id: None,
            display_name: None,
            avatar_url: None,
            syncing: vec![MediaType::Anime],
            auth_valid: true,
        })
        .unwrap()
    }

    fn entry(db: &Storage) -> (LibraryEntry, Vec<Mapping>) {
        let home = Mapping::new(Provider::AniList, MediaType::Anime, "1");
        let set = db.resolve_mappings(std::slice::from_ref(&home)).unwrap();
        let entry = LibraryEntry::new(home);
        db.upsert_library_entry(&entry).unwrap();
        (entry, set.mappings)
    }

    #[tokio::test]
    async fn test_update_fans_out_to_syncing_accounts() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let a2 = link_account(&db, Provider::Mal);
        let (e, mappings) = entry(&db);

        let registry = OneServiceRegistry {
            service: PushRecorder::default(),
        };
        let updated = propagate_update(&db, &registry, &e, &mappings).await.unwrap();

        assert_eq!(updated.synced_accounts, vec![a1, a2]);
        assert!(updated.missed_syncs.is_empty());
        assert_eq!(*registry.service.pushed.lock().unwrap(), vec![a1, a2]);
    }

    #[tokio::test]
    async fn test_one_account_failing_does_not_block_the_rest() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let a2 = link_account(&db, Provider::Mal);
        let a3 = link_account(&db, Provider::AniList);
        let (e, mappings) = entry(&db);

        let registry = OneServiceRegistry {
            service: PushRecorder {
                fail_accounts: vec![a2],
                ..Default::default()
            },
        };
        let updated = propagate_update(&db, &registry, &e, &mappings).await.unwrap();

        assert_eq!(updated.synced_accounts, vec![a1, a3]);
        assert_eq!(updated.missed_syncs.len(), 1);
        assert_eq!(updated.missed_syncs[0].account_id, a2);
        assert_eq!(updated.missed_syncs[0].kind, SyncKind::Update);

        // The miss was persisted too.
        let stored = db.get_library_entry(&e.home).unwrap().unwrap();
        assert_eq!(stored.missed_syncs.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_one_miss_per_account() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let (e, mappings) = entry(&db);

        let registry = OneServiceRegistry {
            service: PushRecorder {
                fail_accounts: vec![a1],
                ..Default::default()
            },
        };
        let once = propagate_update(&db, &registry, &e, &mappings).await.unwrap();
        let twice = propagate_update(&db, &registry, &once, &mappings).await.unwrap();

        assert_eq!(twice.missed_syncs.len(), 1);
        assert!(twice.missed_syncs[0].at >= once.missed_syncs[0].at);
    }

    #[tokio::test]
    async fn test_auth_failure_invalidates_account() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let (e, mappings) = entry(&db);

        let registry = OneServiceRegistry {
            service: PushRecorder {
                auth_fail_accounts: vec![a1],
                ..Default::default()
            },
        };
        propagate_update(&db, &registry, &e, &mappings).await.unwrap();

        let account = db.get_account(a1).unwrap().unwrap();
        assert!(!account.auth_valid);
        // An invalidated account is skipped on the next push.
        let e2 = db.get_library_entry(&e.home).unwrap().unwrap();
        let again = propagate_update(&db, &registry, &e2, &mappings).await.unwrap();
        assert_eq!(again.missed_syncs.len(), 1);
    }

    #[tokio::test]
    async fn test_removal_deletes_locally_when_all_remotes_succeed() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let (mut e, mappings) = entry(&db);
        e.synced_accounts = vec![a1];
        db.upsert_library_entry(&e).unwrap();

        let registry = OneServiceRegistry {
            service: PushRecorder::default(),
        };
        propagate_removal(&db, &registry, &e, &mappings).await.unwrap();

        assert!(db.get_library_entry(&e.home).unwrap().is_none());
        assert_eq!(*registry.service.removed.lock().unwrap(), vec![a1]);
    }

    #[tokio::test]
    async fn test_failed_removal_leaves_tombstone() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let a2 = link_account(&db, Provider::Mal);
        let (mut e, mappings) = entry(&db);
        e.synced_accounts = vec![a1, a2];
        db.upsert_library_entry(&e).unwrap();

        let registry = OneServiceRegistry {
            service: PushRecorder {
                fail_accounts: vec![a2],
                ..Default::default()
            },
        };
        propagate_removal(&db, &registry, &e, &mappings).await.unwrap();

        let tombstone = db.get_library_entry(&e.home).unwrap().unwrap();
        assert_eq!(tombstone.synced_accounts, vec![a2]);
        assert_eq!(tombstone.missed_syncs.len(), 1);
        assert_eq!(tombstone.missed_syncs[0].kind, SyncKind::Removal);
    }

    #[tokio::test]
    async fn test_flush_replays_pending_removal_and_deletes_tombstone() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let (mut e, mappings) = entry(&db);
        e.synced_accounts = vec![a1];
        e.missed_syncs = vec![MissedSync {
            account_id: a1,
            kind: SyncKind::Removal,
            at: Utc::now(),
        }];
        db.upsert_library_entry(&e).unwrap();

        let registry = OneServiceRegistry {
            service: PushRecorder::default(),
        };
        let result = flush_missed_syncs(&db, &registry, &e, &mappings).await.unwrap();

        assert!(result.is_none());
        assert!(db.get_library_entry(&e.home).unwrap().is_none());
        assert_eq!(*registry.service.removed.lock().unwrap(), vec![a1]);
    }

    #[tokio::test]
    async fn test_flush_replays_pending_update() {
        let db = Storage::open_memory().unwrap();
        let a1 = link_account(&db, Provider::AniList);
        let (mut e, mappings) = entry(&db);
        e.missed_syncs = vec![MissedSync {
            account_id: a1,
            kind: SyncKind::Update,
            at: Utc::now(),
        }];
        db.upsert_library_entry(&e).unwrap();

        let registry = OneServiceRegistry {
            service: PushRecorder::default(),
        };
        let updated = flush_missed_syncs(&db, &registry, &e, &mappings)
            .await
            .unwrap()
            .unwrap();

        assert!(updated.missed_syncs.is_empty());
        assert_eq!(updated.synced_accounts, vec![a1]);
    }
}
