use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Mapping;

/// A user review for one media item, keyed by mapping. Independent
/// lifecycle from the library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub mapping: Mapping,
    pub characters: Option<u8>,
    pub illustration: Option<u8>,
    pub soundtrack: Option<u8>,
    pub animation: Option<u8>,
    pub creativity: Option<u8>,
    pub voice: Option<u8>,
    pub writing: Option<u8>,
    pub engagement: Option<u8>,
    pub overall: Option<u8>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub spoiler: bool,
    pub private: bool,
    pub recommendation: Option<String>,
    pub updated_at: DateTime<Utc>,
}
