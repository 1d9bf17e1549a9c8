use serde::{Deserialize, Serialize};

/// A linked tracking provider. Closed set: adding a provider means adding a
/// variant here and a client arm in the service registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    AniList,
    Mal,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AniList => "AniList",
            Self::Mal => "MyAnimeList",
        }
    }

    /// Database string representation (lowercase, no spaces).
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::AniList => "anilist",
            Self::Mal => "mal",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "anilist" => Some(Self::AniList),
            "mal" => Some(Self::Mal),
            _ => None,
        }
    }

    pub const ALL: &[Provider] = &[Self::AniList, Self::Mal];
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of tracked media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Anime,
    Manga,
}

impl MediaType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Anime => "anime",
            Self::Manga => "manga",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "anime" => Some(Self::Anime),
            "manga" => Some(Self::Manga),
            _ => None,
        }
    }

    pub const ALL: &[MediaType] = &[Self::Anime, Self::Manga];
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anime => write!(f, "Anime"),
            Self::Manga => write!(f, "Manga"),
        }
    }
}

/// A provider-qualified identifier for one media item. Immutable; multiple
/// mappings may denote the same real-world media.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping {
    pub provider: Provider,
    pub media_type: MediaType,
    pub remote_id: String,
}

impl Mapping {
    pub fn new(provider: Provider, media_type: MediaType, remote_id: impl Into<String>) -> Self {
        Self {
            provider,
            media_type,
            remote_id: remote_id.into(),
        }
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.provider.as_db_str(),
            self.media_type.as_db_str(),
            self.remote_id
        )
    }
}

/// A group of mappings believed to refer to the same real-world media.
/// Sets are disjoint: a mapping belongs to at most one set at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSet {
    pub id: i64,
    pub mappings: Vec<Mapping>,
}

impl MappingSet {
    /// The member mapping for a given provider, if the set has one.
    pub fn for_provider(&self, provider: Provider) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.provider == provider)
    }

    pub fn contains(&self, mapping: &Mapping) -> bool {
        self.mappings.iter().any(|m| m == mapping)
    }
}

/// A title with language variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

impl MediaTitle {
    /// Returns the best available display title.
    pub fn preferred(&self) -> &str {
        self.romaji
            .as_deref()
            .or(self.english.as_deref())
            .or(self.native.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Normalized snapshot of a media item as seen through one provider,
/// tagged with the mapping it was fetched through. Overwritten whenever
/// fresh provider data arrives; never merged across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub mapping: Mapping,
    pub title: MediaTitle,
    pub cover_url: Option<String>,
    pub banner_url: Option<String>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub genres: Vec<String>,
    pub format: Option<String>,
    pub airing_status: Option<String>,
    pub content_rating: Option<String>,
    pub adult: bool,
}
