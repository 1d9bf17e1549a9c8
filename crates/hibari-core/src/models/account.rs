use serde::{Deserialize, Serialize};

use super::{MediaType, Provider};

/// A linked external tracker account. Token material is opaque to the
/// core: it is handed to provider clients as-is, never refreshed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: i64,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub remote_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Media types this account is enabled to sync.
    pub syncing: Vec<MediaType>,
    /// Cleared on terminal auth failure; sync stops until re-linked.
    pub auth_valid: bool,
}

impl ExternalAccount {
    pub fn syncs(&self, media_type: MediaType) -> bool {
        self.auth_valid && self.syncing.contains(&media_type)
    }
}
