use chrono::{TimeZone, Utc};
use serde::Deserialize;

use hibari_core::models::{
    EntryStatus, LibraryEntry, Mapping, MediaRecord, MediaTitle, MediaType, Progress, Provider,
};
use hibari_core::service::LibraryItem;

// ── GraphQL response wrappers ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: T,
}

// ── Search / media queries ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageResponse {
    #[serde(rename = "Page")]
    pub page: PageData,
}

#[derive(Debug, Deserialize)]
pub struct PageData {
    pub media: Vec<AniListMedia>,
}

#[derive(Debug, Deserialize)]
pub struct MediaResponse {
    #[serde(rename = "Media")]
    pub media: AniListMedia,
}

#[derive(Debug, Deserialize)]
pub struct AniListMedia {
    pub id: u64,
    #[serde(rename = "idMal")]
    pub id_mal: Option<u64>,
    pub title: Option<AniListTitle>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    #[serde(rename = "coverImage")]
    pub cover_image: Option<CoverImage>,
    #[serde(rename = "bannerImage")]
    pub banner_image: Option<String>,
    pub genres: Option<Vec<String>>,
    pub format: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "isAdult")]
    pub is_adult: Option<bool>,
    #[serde(rename = "isFavourite")]
    pub is_favourite: Option<bool>,
    #[serde(rename = "startDate")]
    pub start_date: Option<FuzzyDate>,
    #[serde(rename = "endDate")]
    pub end_date: Option<FuzzyDate>,
}

#[derive(Debug, Deserialize)]
pub struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoverImage {
    pub large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FuzzyDate {
    pub year: Option<u32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

// ── User list queries ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MediaListCollectionResponse {
    #[serde(rename = "MediaListCollection")]
    pub media_list_collection: MediaListCollection,
}

#[derive(Debug, Deserialize)]
pub struct MediaListCollection {
    pub lists: Vec<MediaListGroup>,
    #[serde(rename = "hasNextChunk")]
    pub has_next_chunk: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MediaListGroup {
    pub entries: Vec<MediaListEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MediaListEntry {
    pub progress: Option<u32>,
    #[serde(rename = "progressVolumes")]
    pub progress_volumes: Option<u32>,
    pub score: Option<f32>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub repeat: Option<u32>,
    pub private: Option<bool>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<FuzzyDate>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<FuzzyDate>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<i64>,
    pub media: AniListMedia,
}

// ── Viewer query ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ViewerResponse {
    #[serde(rename = "Viewer")]
    pub viewer: Viewer,
}

#[derive(Debug, Deserialize)]
pub struct Viewer {
    pub id: u64,
    pub name: String,
    pub avatar: Option<ViewerAvatar>,
}

#[derive(Debug, Deserialize)]
pub struct ViewerAvatar {
    pub large: Option<String>,
}

// ── Entry lookup / delete ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MediaListLookupResponse {
    #[serde(rename = "MediaList")]
    pub media_list: Option<MediaListId>,
}

#[derive(Debug, Deserialize)]
pub struct MediaListId {
    pub id: u64,
}

// ── Conversions ──────────────────────────────────────────────────

impl FuzzyDate {
    pub fn to_string_opt(&self) -> Option<String> {
        let y = self.year?;
        let m = self.month.unwrap_or(1);
        let d = self.day.unwrap_or(1);
        Some(format!("{y:04}-{m:02}-{d:02}"))
    }
}

impl AniListMedia {
    /// The AniList id plus the MAL cross-reference when AniList knows it.
    pub fn mappings(&self, media_type: MediaType) -> Vec<Mapping> {
        let mut mappings = vec![Mapping::new(
            Provider::AniList,
            media_type,
            self.id.to_string(),
        )];
        if let Some(mal_id) = self.id_mal {
            mappings.push(Mapping::new(Provider::Mal, media_type, mal_id.to_string()));
        }
        mappings
    }

    pub fn into_record(self, media_type: MediaType) -> MediaRecord {
        MediaRecord {
            mapping: Mapping::new(Provider::AniList, media_type, self.id.to_string()),
            title: match self.title {
                Some(t) => MediaTitle {
                    romaji: t.romaji,
                    english: t.english,
                    native: t.native,
                },
                None => MediaTitle::default(),
            },
            cover_url: self.cover_image.and_then(|c| c.large),
            banner_url: self.banner_image,
            episodes: self.episodes,
            chapters: self.chapters,
            volumes: self.volumes,
            start_date: self.start_date.as_ref().and_then(|d| d.to_string_opt()),
            end_date: self.end_date.as_ref().and_then(|d| d.to_string_opt()),
            genres: self.genres.unwrap_or_default(),
            format: self.format,
            airing_status: self.status,
            content_rating: None,
            adult: self.is_adult.unwrap_or(false),
        }
    }
}

impl MediaListEntry {
    pub fn into_library_item(self, media_type: MediaType) -> LibraryItem {
        let mappings = self.media.mappings(media_type);
        let home = mappings[0].clone();

        let mut entry = LibraryEntry::new(home);
        entry.status = self
            .status
            .as_deref()
            .map(status_from_anilist)
            .unwrap_or(EntryStatus::NotStarted);
        // POINT_100 format; 0 means unrated.
        entry.score = self
            .score
            .map(|s| s.round() as u8)
            .filter(|s| *s > 0);
        entry.progress = match media_type {
            MediaType::Anime => Progress {
                episodes: self.progress.unwrap_or(0),
                chapters: 0,
                volumes: 0,
            },
            MediaType::Manga => Progress {
                episodes: 0,
                chapters: self.progress.unwrap_or(0),
                volumes: self.progress_volumes.unwrap_or(0),
            },
        };
        entry.restarts = self.repeat.unwrap_or(0);
        entry.started_at = self.started_at.as_ref().and_then(|d| d.to_string_opt());
        entry.finished_at = self.completed_at.as_ref().and_then(|d| d.to_string_opt());
        entry.notes = self.notes.unwrap_or_default();
        entry.private = self.private.unwrap_or(false);
        entry.favorite = self.media.is_favourite.unwrap_or(false);
        entry.updated_at = self
            .updated_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_default();

        LibraryItem {
            media: self.media.into_record(media_type),
            entry,
            mappings,
        }
    }
}

pub fn status_from_anilist(status: &str) -> EntryStatus {
    match status {
        "CURRENT" | "REPEATING" => EntryStatus::InProgress,
        "PLANNING" => EntryStatus::Planned,
        "COMPLETED" => EntryStatus::Completed,
        "DROPPED" => EntryStatus::Dropped,
        "PAUSED" => EntryStatus::Paused,
        _ => EntryStatus::NotStarted,
    }
}

pub fn status_to_anilist(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::InProgress => "CURRENT",
        EntryStatus::Completed => "COMPLETED",
        EntryStatus::Dropped => "DROPPED",
        EntryStatus::Paused => "PAUSED",
        EntryStatus::Planned | EntryStatus::NotStarted => "PLANNING",
    }
}

pub fn media_type_to_anilist(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Anime => "ANIME",
        MediaType::Manga => "MANGA",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_search_response() {
        let json = r#"{
            "data": {
                "Page": {
                    "media": [
                        {
                            "id": 154587,
                            "idMal": 52991,
                            "title": {
                                "romaji": "Sousou no Frieren",
                                "english": "Frieren: Beyond Journey's End",
                                "native": "葬送のフリーレン"
                            },
                            "episodes": 28,
                            "coverImage": { "large": "https://s4.anilist.co/cover.jpg" },
                            "genres": ["Adventure", "Fantasy"],
                            "format": "TV",
                            "status": "FINISHED",
                            "isAdult": false,
                            "startDate": { "year": 2023, "month": 9, "day": 29 },
                            "endDate": { "year": 2024, "month": 3, "day": 22 }
                        }
                    ]
                }
            }
        }"#;

        let resp: GraphQLResponse<PageResponse> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.page.media.len(), 1);

        let media = resp.data.page.media.into_iter().next().unwrap();
        let mappings = media.mappings(MediaType::Anime);
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].provider, Provider::AniList);
        assert_eq!(mappings[0].remote_id, "154587");
        assert_eq!(mappings[1].provider, Provider::Mal);
        assert_eq!(mappings[1].remote_id, "52991");

        let record = media.into_record(MediaType::Anime);
        assert_eq!(record.title.preferred(), "Sousou no Frieren");
        assert_eq!(record.episodes, Some(28));
        assert_eq!(record.start_date.as_deref(), Some("2023-09-29"));
        assert!(!record.adult);
    }

    #[test]
    fn test_deserialize_list_chunk() {
        let json = r#"{
            "data": {
                "MediaListCollection": {
                    "hasNextChunk": false,
                    "lists": [
                        {
                            "entries": [
                                {
                                    "progress": 14,
                                    "score": 90,
                                    "status": "CURRENT",
                                    "notes": "weekly",
                                    "repeat": 0,
                                    "private": false,
                                    "updatedAt": 1705312800,
                                    "media": {
                                        "id": 154587,
                                        "idMal": 52991,
                                        "title": { "romaji": "Sousou no Frieren" },
                                        "episodes": 28,
                                        "isFavourite": true
                                    }
                                }
                            ]
                        }
                    ]
                }
            }
        }"#;

        let resp: GraphQLResponse<MediaListCollectionResponse> =
            serde_json::from_str(json).unwrap();
        let collection = resp.data.media_list_collection;
        assert_eq!(collection.has_next_chunk, Some(false));

        let entry = collection
            .lists
            .into_iter()
            .flat_map(|g| g.entries)
            .next()
            .unwrap();
        let item = entry.into_library_item(MediaType::Anime);
        assert_eq!(item.entry.status, EntryStatus::InProgress);
        assert_eq!(item.entry.score, Some(90));
        assert_eq!(item.entry.progress.episodes, 14);
        assert_eq!(item.entry.notes, "weekly");
        assert!(item.entry.favorite);
        assert_eq!(item.entry.home.remote_id, "154587");
        assert_eq!(item.mappings.len(), 2);
        assert_eq!(item.entry.updated_at.timestamp(), 1705312800);
    }

    #[test]
    fn test_manga_progress_lands_in_chapters() {
        let json = r#"{
            "progress": 120,
            "progressVolumes": 14,
            "updatedAt": 1705312800,
            "media": { "id": 30002, "idMal": 2 }
        }"#;

        let entry: MediaListEntry = serde_json::from_str(json).unwrap();
        let item = entry.into_library_item(MediaType::Manga);
        assert_eq!(item.entry.progress.chapters, 120);
        assert_eq!(item.entry.progress.volumes, 14);
        assert_eq!(item.entry.progress.episodes, 0);
        assert_eq!(item.entry.home.media_type, MediaType::Manga);
    }

    #[test]
    fn test_zero_score_means_unrated() {
        let json = r#"{ "score": 0, "media": { "id": 1 } }"#;
        let entry: MediaListEntry = serde_json::from_str(json).unwrap();
        let item = entry.into_library_item(MediaType::Anime);
        assert_eq!(item.entry.score, None);
        // No MAL cross-reference, so only the AniList mapping.
        assert_eq!(item.mappings.len(), 1);
    }

    #[test]
    fn test_status_round_trip() {
        for &status in EntryStatus::ALL {
            let remote = status_to_anilist(status);
            let back = status_from_anilist(remote);
            if status == EntryStatus::NotStarted {
                assert_eq!(back, EntryStatus::Planned);
            } else {
                assert_eq!(back, status);
            }
        }
    }
}
