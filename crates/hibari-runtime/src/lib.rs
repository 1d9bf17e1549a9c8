//! Async facade over the hibari core.
//!
//! The [`Runtime`] owns storage, configuration, and the provider client
//! set, and exposes the operations a frontend needs: search, library
//! reads and patches, imports, and sync fan-out.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use hibari_api::ClientSet;
use hibari_core::config::AppConfig;
use hibari_core::error::HibariError;
use hibari_core::import::{import_library, ImportLock, ImportOptions, ImportReport};
use hibari_core::models::{
    EntryStatus, ExternalAccount, LibraryEntry, Mapping, MediaList, MediaRecord, MediaType,
    Provider, Review,
};
use hibari_core::service::{MediaHit, ServiceRegistry, TrackerService};
use hibari_core::storage::Storage;
use hibari_core::sync;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] HibariError),
    #[error("an import for account {0} is already running")]
    ImportBusy(i64),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("provider {0} is not configured")]
    ProviderDisabled(Provider),
}

/// Partial library entry update coming from a frontend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibraryPatch {
    pub status: Option<EntryStatus>,
    pub score: Option<Option<u8>>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    pub restarts: Option<u32>,
    pub favorite: Option<bool>,
    pub started_at: Option<Option<String>>,
    pub finished_at: Option<Option<String>>,
    pub notes: Option<String>,
    pub private: Option<bool>,
}

impl LibraryPatch {
    fn apply(&self, entry: &mut LibraryEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(score) = self.score {
            entry.score = score;
        }
        if let Some(episodes) = self.episodes {
            entry.progress.episodes = episodes;
        }
        if let Some(chapters) = self.chapters {
            entry.progress.chapters = chapters;
        }
        if let Some(volumes) = self.volumes {
            entry.progress.volumes = volumes;
        }
        if let Some(restarts) = self.restarts {
            entry.restarts = restarts;
        }
        if let Some(favorite) = self.favorite {
            entry.favorite = favorite;
        }
        if let Some(ref started_at) = self.started_at {
            entry.started_at = started_at.clone();
        }
        if let Some(ref finished_at) = self.finished_at {
            entry.finished_at = finished_at.clone();
        }
        if let Some(ref notes) = self.notes {
            entry.notes = notes.clone();
        }
        if let Some(private) = self.private {
            entry.private = private;
        }
        entry.updated_at = Utc::now();
    }
}

pub struct Runtime {
    storage: Mutex<Storage>,
    clients: RwLock<Arc<ClientSet>>,
    config: RwLock<AppConfig>,
    import_lock: ImportLock,
}

impl Runtime {
    /// Load config, open the database at its platform path, and build
    /// the provider clients.
    pub fn new() -> Result<Self, RuntimeError> {
        let config = AppConfig::load().map_err(|e| RuntimeError::Config(e.to_string()))?;
        let db_path =
            AppConfig::ensure_db_path().map_err(|e| RuntimeError::Config(e.to_string()))?;
        let storage = Storage::open(&db_path)?;
        Ok(Self::from_parts(storage, config))
    }

    /// Assemble a runtime around an existing storage handle (used by
    /// tests with an in-memory database).
    pub fn from_parts(storage: Storage, config: AppConfig) -> Self {
        let clients = Arc::new(ClientSet::from_config(&config));
        Self {
            storage: Mutex::new(storage),
            clients: RwLock::new(clients),
            config: RwLock::new(config),
            import_lock: ImportLock::new(),
        }
    }

    pub async fn get_config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Persist a new config and rebuild the provider clients to match.
    pub async fn update_config(&self, new_config: AppConfig) -> Result<(), RuntimeError> {
        new_config
            .save()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        *self.clients.write().await = Arc::new(ClientSet::from_config(&new_config));
        *self.config.write().await = new_config;
        Ok(())
    }

    async fn clients(&self) -> Arc<ClientSet> {
        Arc::clone(&*self.clients.read().await)
    }

    // ── Search and media ────────────────────────────────────────

    /// Search a provider and persist everything it returned, so search
    /// results are browsable offline and their mappings are known.
    pub async fn search(
        &self,
        provider: Provider,
        media_type: MediaType,
        query: &str,
    ) -> Result<Vec<MediaHit>, RuntimeError> {
        let clients = self.clients().await;
        let service = clients
            .service_for(provider)
            .ok_or(RuntimeError::ProviderDisabled(provider))?;
        let hits = service
            .search(media_type, query)
            .await
            .map_err(HibariError::from)?;

        let storage = self.storage.lock().await;
        for hit in &hits {
            storage.resolve_mappings(&hit.mappings)?;
            storage.upsert_media_record(&hit.media)?;
        }
        Ok(hits)
    }

    /// Fetch one media fresh from its provider, fold its cross-references
    /// into the mapping store, and return the updated record.
    pub async fn refresh_media(&self, mapping: &Mapping) -> Result<MediaRecord, RuntimeError> {
        let clients = self.clients().await;
        let service = clients
            .service_for(mapping.provider)
            .ok_or(RuntimeError::ProviderDisabled(mapping.provider))?;
        let hit = service
            .get_media(mapping.media_type, &mapping.remote_id)
            .await
            .map_err(HibariError::from)?;

        let storage = self.storage.lock().await;
        storage.resolve_mappings(&hit.mappings)?;
        storage.upsert_media_record(&hit.media)?;
        Ok(hit.media)
    }

    pub async fn get_media_record(
        &self,
        mapping: &Mapping,
    ) -> Result<Option<MediaRecord>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.get_media_record(mapping)?)
    }

    // ── Library ─────────────────────────────────────────────────

    pub async fn library(&self) -> Result<Vec<LibraryEntry>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.all_library_entries()?)
    }

    pub async fn library_by_status(
        &self,
        status: EntryStatus,
    ) -> Result<Vec<LibraryEntry>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.entries_by_status(status)?)
    }

    /// The entry for any mapping of the media, via its mapping set.
    pub async fn entry(&self, mapping: &Mapping) -> Result<Option<LibraryEntry>, RuntimeError> {
        let storage = self.storage.lock().await;
        match storage.find_set(mapping)? {
            Some(set) => Ok(storage.entry_for_set(set.id)?),
            None => Ok(storage.get_library_entry(mapping)?),
        }
    }

    /// Apply a patch to the entry for this media, creating it if absent,
    /// then push the change to linked accounts when auto-push is on.
    pub async fn patch_entry(
        &self,
        mapping: &Mapping,
        patch: &LibraryPatch,
    ) -> Result<LibraryEntry, RuntimeError> {
        let (mut entry, set_mappings) = {
            let storage = self.storage.lock().await;
            let set = storage.resolve_mappings(std::slice::from_ref(mapping))?;
            let entry = storage
                .entry_for_set(set.id)?
                .unwrap_or_else(|| LibraryEntry::new(mapping.clone()));
            (entry, set.mappings)
        };
        patch.apply(&mut entry);

        let auto_push = self.config.read().await.sync.auto_push;
        let storage = self.storage.lock().await;
        if auto_push {
            let clients = self.clients().await;
            let pushed = sync::propagate_update(&storage, &*clients, &entry, &set_mappings).await?;
            Ok(pushed)
        } else {
            storage.upsert_library_entry(&entry)?;
            Ok(entry)
        }
    }

    /// Remove the entry for this media locally and from every account it
    /// was synced to.
    pub async fn remove_entry(&self, mapping: &Mapping) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        let (entry, set_mappings) = match storage.find_set(mapping)? {
            Some(set) => match storage.entry_for_set(set.id)? {
                Some(entry) => (entry, set.mappings),
                None => return Err(RuntimeError::NotFound(mapping.to_string())),
            },
            None => return Err(RuntimeError::NotFound(mapping.to_string())),
        };

        let clients = self.clients().await;
        sync::propagate_removal(&storage, &*clients, &entry, &set_mappings).await?;
        Ok(())
    }

    /// Replay an entry's missed syncs.
    pub async fn retry_missed_syncs(
        &self,
        mapping: &Mapping,
    ) -> Result<Option<LibraryEntry>, RuntimeError> {
        let storage = self.storage.lock().await;
        let (entry, set_mappings) = match storage.find_set(mapping)? {
            Some(set) => match storage.entry_for_set(set.id)? {
                Some(entry) => (entry, set.mappings),
                None => return Err(RuntimeError::NotFound(mapping.to_string())),
            },
            None => return Err(RuntimeError::NotFound(mapping.to_string())),
        };

        let clients = self.clients().await;
        Ok(sync::flush_missed_syncs(&storage, &*clients, &entry, &set_mappings).await?)
    }

    // ── Import ──────────────────────────────────────────────────

    /// Import an account's remote library. One import per account at a
    /// time; a second call while one runs returns `ImportBusy`.
    pub async fn import_from(
        &self,
        account_id: i64,
        media_type: MediaType,
    ) -> Result<ImportReport, RuntimeError> {
        let _guard = self
            .import_lock
            .acquire(account_id)
            .ok_or(RuntimeError::ImportBusy(account_id))?;

        let config = self.config.read().await.clone();
        let account = {
            let storage = self.storage.lock().await;
            storage
                .get_account(account_id)?
                .ok_or_else(|| RuntimeError::NotFound(format!("account {account_id}")))?
        };
        let clients = self.clients().await;
        let service = clients
            .service_for(account.provider)
            .ok_or(RuntimeError::ProviderDisabled(account.provider))?;

        let since = if config.library.incremental_import {
            let storage = self.storage.lock().await;
            storage.import_checkpoint(account_id, media_type)?
        } else {
            None
        };
        let options = ImportOptions {
            policy: config.library.policy(),
            since,
        };

        // Taken before the pull so entries updated while it runs are
        // picked up again next time.
        let started = Utc::now();
        let storage = self.storage.lock().await;
        let report = import_library(&storage, service, &account, media_type, &options).await?;
        storage.set_import_checkpoint(account_id, media_type, started)?;
        info!(
            account_id,
            inserted = report.inserted,
            merged = report.merged,
            "import complete"
        );
        Ok(report)
    }

    // ── Accounts ────────────────────────────────────────────────

    /// Link an account and fetch its remote profile.
    pub async fn link_account(&self, mut account: ExternalAccount) -> Result<i64, RuntimeError> {
        let id = {
            let storage = self.storage.lock().await;
            storage.insert_account(&account)?
        };
        account.id = id;
        if let Err(e) = self.refresh_profile(id).await {
            tracing::warn!(account_id = id, "profile fetch after link failed: {e}");
        }
        Ok(id)
    }

    pub async fn accounts(&self) -> Result<Vec<ExternalAccount>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.get_accounts()?)
    }

    pub async fn unlink_account(&self, id: i64) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.delete_account(id)?;
        Ok(())
    }

    /// Store re-issued tokens for an account; clears the auth-invalid flag.
    pub async fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.update_account_tokens(id, access_token, refresh_token, expires_at)?;
        Ok(())
    }

    pub async fn set_account_syncing(
        &self,
        id: i64,
        syncing: &[MediaType],
    ) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.set_account_syncing(id, syncing)?;
        Ok(())
    }

    /// Re-fetch the account's remote profile (name, avatar, remote id).
    pub async fn refresh_profile(&self, id: i64) -> Result<ExternalAccount, RuntimeError> {
        let account = {
            let storage = self.storage.lock().await;
            storage
                .get_account(id)?
                .ok_or_else(|| RuntimeError::NotFound(format!("account {id}")))?
        };
        let clients = self.clients().await;
        let service = clients
            .service_for(account.provider)
            .ok_or(RuntimeError::ProviderDisabled(account.provider))?;
        let user = service.get_user(&account).await.map_err(HibariError::from)?;

        let storage = self.storage.lock().await;
        storage.update_account_profile(
            id,
            &user.remote_id,
            &user.display_name,
            user.avatar_url.as_deref(),
        )?;
        storage
            .get_account(id)?
            .ok_or_else(|| RuntimeError::NotFound(format!("account {id}")))
    }

    // ── Lists ───────────────────────────────────────────────────

    pub async fn create_list(&self, name: &str) -> Result<i64, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.create_list(name)?)
    }

    pub async fn lists(&self) -> Result<Vec<MediaList>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.get_lists()?)
    }

    pub async fn rename_list(&self, id: i64, name: &str) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.rename_list(id, name)?;
        Ok(())
    }

    pub async fn delete_list(&self, id: i64) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.delete_list(id)?;
        Ok(())
    }

    pub async fn add_to_list(&self, list_id: i64, mapping: &Mapping) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.add_list_item(list_id, mapping)?;
        Ok(())
    }

    pub async fn remove_from_list(
        &self,
        list_id: i64,
        mapping: &Mapping,
    ) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.remove_list_item(list_id, mapping)?;
        Ok(())
    }

    // ── Reviews ─────────────────────────────────────────────────

    pub async fn save_review(&self, review: &Review) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.upsert_review(review)?;
        Ok(())
    }

    pub async fn review(&self, mapping: &Mapping) -> Result<Option<Review>, RuntimeError> {
        let storage = self.storage.lock().await;
        Ok(storage.get_review(mapping)?)
    }

    pub async fn delete_review(&self, mapping: &Mapping) -> Result<(), RuntimeError> {
        let storage = self.storage.lock().await;
        storage.delete_review(mapping)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        let storage = Storage::open_memory().unwrap();
        let mut config = AppConfig::default();
        // No accounts are linked in these tests, so auto-push is a no-op
        // fan-out; keep it on to exercise the sync path.
        config.sync.auto_push = true;
        Runtime::from_parts(storage, config)
    }

    fn mapping(id: &str) -> Mapping {
        Mapping::new(Provider::AniList, MediaType::Anime, id)
    }

    #[tokio::test]
    async fn test_patch_creates_entry() {
        let rt = runtime();
        let patch = LibraryPatch {
            status: Some(EntryStatus::InProgress),
            episodes: Some(5),
            ..Default::default()
        };
        let entry = rt.patch_entry(&mapping("1"), &patch).await.unwrap();
        assert_eq!(entry.status, EntryStatus::InProgress);
        assert_eq!(entry.progress.episodes, 5);

        let found = rt.entry(&mapping("1")).await.unwrap().unwrap();
        assert_eq!(found.progress.episodes, 5);
    }

    #[tokio::test]
    async fn test_patch_updates_existing_entry() {
        let rt = runtime();
        rt.patch_entry(
            &mapping("1"),
            &LibraryPatch {
                status: Some(EntryStatus::InProgress),
                episodes: Some(5),
                score: Some(Some(80)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let entry = rt
            .patch_entry(
                &mapping("1"),
                &LibraryPatch {
                    episodes: Some(6),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Untouched fields survive the second patch.
        assert_eq!(entry.progress.episodes, 6);
        assert_eq!(entry.score, Some(80));
        assert_eq!(entry.status, EntryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_patch_can_clear_score() {
        let rt = runtime();
        rt.patch_entry(
            &mapping("1"),
            &LibraryPatch {
                score: Some(Some(80)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let entry = rt
            .patch_entry(
                &mapping("1"),
                &LibraryPatch {
                    score: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(entry.score, None);
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let rt = runtime();
        rt.patch_entry(&mapping("1"), &LibraryPatch::default())
            .await
            .unwrap();
        rt.remove_entry(&mapping("1")).await.unwrap();
        assert!(rt.entry(&mapping("1")).await.unwrap().is_none());

        let err = rt.remove_entry(&mapping("1")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_import_requires_known_account() {
        let rt = runtime();
        let err = rt.import_from(42, MediaType::Anime).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lists_and_reviews_round_trip() {
        let rt = runtime();
        let list_id = rt.create_list("rewatch queue").await.unwrap();
        rt.add_to_list(list_id, &mapping("1")).await.unwrap();

        let lists = rt.lists().await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].items.len(), 1);

        let review = Review {
            mapping: mapping("1"),
            characters: None,
            illustration: None,
            soundtrack: None,
            animation: None,
            creativity: None,
            voice: None,
            writing: None,
            engagement: None,
            overall: Some(88),
            summary: Some("holds up".into()),
            body: None,
            spoiler: false,
            private: false,
            recommendation: None,
            updated_at: Utc::now(),
        };
        rt.save_review(&review).await.unwrap();
        let got = rt.review(&mapping("1")).await.unwrap().unwrap();
        assert_eq!(got.overall, Some(88));
    }
}
