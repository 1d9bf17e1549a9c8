use serde::{Deserialize, Serialize};

use super::Mapping;

/// A user-defined named collection of mappings. Membership is unique;
/// insertion order carries no meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaList {
    pub id: i64,
    pub name: String,
    pub items: Vec<Mapping>,
}
