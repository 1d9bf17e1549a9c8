use hibari_core::config::AppConfig;
use hibari_core::models::{ExternalAccount, LibraryEntry, Mapping, MediaType, Provider};
use hibari_core::service::{
    LibraryPage, MediaHit, RemoteUser, ServiceError, ServiceRegistry, TrackerService,
};

use crate::anilist::AniListClient;
use crate::mal::MalClient;

/// A configured client for one provider.
///
/// The enum keeps provider dispatch exhaustive: adding a provider means
/// the compiler walks you through every match below.
pub enum ProviderClient {
    AniList(AniListClient),
    Mal(MalClient),
}

impl ProviderClient {
    pub fn provider(&self) -> Provider {
        match self {
            Self::AniList(_) => Provider::AniList,
            Self::Mal(_) => Provider::Mal,
        }
    }
}

impl TrackerService for ProviderClient {
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
    ) -> Result<Vec<MediaHit>, ServiceError> {
        match self {
            Self::AniList(c) => c.search(media_type, query).await,
            Self::Mal(c) => c.search(media_type, query).await,
        }
    }

    async fn get_media(
        &self,
        media_type: MediaType,
        remote_id: &str,
    ) -> Result<MediaHit, ServiceError> {
        match self {
            Self::AniList(c) => c.get_media(media_type, remote_id).await,
            Self::Mal(c) => c.get_media(media_type, remote_id).await,
        }
    }

    async fn library_page(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        page: u32,
    ) -> Result<LibraryPage, ServiceError> {
        match self {
            Self::AniList(c) => c.library_page(account, media_type, page).await,
            Self::Mal(c) => c.library_page(account, media_type, page).await,
        }
    }

    async fn get_user(&self, account: &ExternalAccount) -> Result<RemoteUser, ServiceError> {
        match self {
            Self::AniList(c) => c.get_user(account).await,
            Self::Mal(c) => c.get_user(account).await,
        }
    }

    async fn update_entry(
        &self,
        account: &ExternalAccount,
        entry: &LibraryEntry,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        match self {
            Self::AniList(c) => c.update_entry(account, entry, mappings).await,
            Self::Mal(c) => c.update_entry(account, entry, mappings).await,
        }
    }

    async fn remove_entry(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        match self {
            Self::AniList(c) => c.remove_entry(account, media_type, mappings).await,
            Self::Mal(c) => c.remove_entry(account, media_type, mappings).await,
        }
    }
}

/// The set of provider clients enabled by configuration.
pub struct ClientSet {
    anilist: Option<ProviderClient>,
    mal: Option<ProviderClient>,
}

impl ClientSet {
    /// Build clients for every provider the config enables.
    pub fn from_config(config: &AppConfig) -> Self {
        let anilist = config
            .services
            .anilist
            .enabled
            .then(|| ProviderClient::AniList(AniListClient::new()));
        let mal = config
            .services
            .mal
            .enabled
            .then(|| ProviderClient::Mal(MalClient::new(config.services.mal.client_id.clone())));
        Self { anilist, mal }
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.service_for(*p).is_some())
            .collect()
    }
}

impl ServiceRegistry for ClientSet {
    type Service = ProviderClient;

    fn service_for(&self, provider: Provider) -> Option<&ProviderClient> {
        match provider {
            Provider::AniList => self.anilist.as_ref(),
            Provider::Mal => self.mal.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_set_follows_config() {
        let mut config = AppConfig::default();
        config.services.mal.enabled = false;

        let set = ClientSet::from_config(&config);
        assert!(set.service_for(Provider::AniList).is_some());
        assert!(set.service_for(Provider::Mal).is_none());
        assert_eq!(set.enabled_providers(), vec![Provider::AniList]);
    }

    #[test]
    fn test_provider_client_reports_its_provider() {
        let client = ProviderClient::AniList(AniListClient::new());
        assert_eq!(client.provider(), Provider::AniList);
    }
}
