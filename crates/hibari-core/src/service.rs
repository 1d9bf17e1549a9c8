//! Trait definitions for tracking-provider clients.
//!
//! Provider clients (AniList, MyAnimeList) implement [`TrackerService`],
//! keeping the importer and sync propagator provider-agnostic. Clients
//! return already-normalized domain records; wire formats never cross
//! this boundary.

use std::future::Future;

use thiserror::Error;

use crate::models::{ExternalAccount, LibraryEntry, Mapping, MediaRecord, MediaType, Provider};

/// Errors surfaced by provider clients. One shared taxonomy for every
/// provider: callers only distinguish auth failures (stop syncing the
/// account) from everything else (record and move on).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("auth error: {0}")]
    Auth(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ServiceError {
    /// True when the failure is terminal for the account's credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_)) || matches!(self, Self::Api { status: 401, .. })
    }
}

/// A media record together with every mapping the provider disclosed for
/// it (its own id plus any cross-references to other providers).
#[derive(Debug, Clone)]
pub struct MediaHit {
    pub media: MediaRecord,
    pub mappings: Vec<Mapping>,
}

/// One item of a user's remote library feed.
#[derive(Debug, Clone)]
pub struct LibraryItem {
    pub media: MediaRecord,
    pub entry: LibraryEntry,
    pub mappings: Vec<Mapping>,
}

/// One page of a user's remote library feed, newest-updated first.
#[derive(Debug, Clone)]
pub struct LibraryPage {
    pub items: Vec<LibraryItem>,
    pub has_next: bool,
}

/// Remote profile data for a linked account.
#[derive(Debug, Clone)]
pub struct RemoteUser {
    pub remote_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A unified tracking-provider interface.
pub trait TrackerService: Send + Sync {
    /// Search for media by title.
    fn search(
        &self,
        media_type: MediaType,
        query: &str,
    ) -> impl Future<Output = Result<Vec<MediaHit>, ServiceError>> + Send;

    /// Fetch one media item by its provider-local id, including any
    /// cross-provider id references the provider discloses.
    fn get_media(
        &self,
        media_type: MediaType,
        remote_id: &str,
    ) -> impl Future<Output = Result<MediaHit, ServiceError>> + Send;

    /// Fetch one page of the account's library feed. Pages start at 1 and
    /// are restartable; the feed is finite and ordered newest-update
    /// first as delivered by the remote.
    fn library_page(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        page: u32,
    ) -> impl Future<Output = Result<LibraryPage, ServiceError>> + Send;

    /// Fetch the account's remote profile.
    fn get_user(
        &self,
        account: &ExternalAccount,
    ) -> impl Future<Output = Result<RemoteUser, ServiceError>> + Send;

    /// Push a library entry's state to the remote account. All-or-nothing
    /// per call; there are no partial-field semantics.
    fn update_entry(
        &self,
        account: &ExternalAccount,
        entry: &LibraryEntry,
        mappings: &[Mapping],
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Remove a library entry from the remote account. Removing an entry
    /// the remote does not have is a success.
    fn remove_entry(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        mappings: &[Mapping],
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

/// Maps a provider to its client. Implemented as a closed, exhaustive
/// lookup over [`Provider`] variants; there is no open registration.
pub trait ServiceRegistry: Send + Sync {
    type Service: TrackerService;

    fn service_for(&self, provider: Provider) -> Option<&Self::Service>;
}
