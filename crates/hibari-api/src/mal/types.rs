use chrono::{DateTime, Utc};
use serde::Deserialize;

use hibari_core::models::{
    EntryStatus, LibraryEntry, Mapping, MediaRecord, MediaTitle, MediaType, Progress, Provider,
};
use hibari_core::service::LibraryItem;

// ── Search / media detail responses ─────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MalSearchResponse {
    pub data: Vec<MalSearchNode>,
}

#[derive(Debug, Deserialize)]
pub struct MalSearchNode {
    pub node: MalMediaNode,
}

#[derive(Debug, Deserialize)]
pub struct MalMediaNode {
    pub id: u64,
    pub title: String,
    pub main_picture: Option<MalPicture>,
    pub alternative_titles: Option<MalAlternativeTitles>,
    pub num_episodes: Option<u32>,
    pub num_chapters: Option<u32>,
    pub num_volumes: Option<u32>,
    pub media_type: Option<String>,
    pub status: Option<String>,
    pub genres: Option<Vec<MalGenre>>,
    pub rating: Option<String>,
    pub nsfw: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MalPicture {
    pub medium: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MalAlternativeTitles {
    pub en: Option<String>,
    pub ja: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MalGenre {
    pub id: u64,
    pub name: String,
}

// ── User list responses ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MalListResponse {
    pub data: Vec<MalListItem>,
    pub paging: MalPaging,
}

#[derive(Debug, Deserialize)]
pub struct MalListItem {
    pub node: MalMediaNode,
    pub list_status: MalListStatus,
}

#[derive(Debug, Deserialize)]
pub struct MalListStatus {
    pub status: Option<String>,
    pub score: Option<u32>,
    pub num_episodes_watched: Option<u32>,
    pub num_chapters_read: Option<u32>,
    pub num_volumes_read: Option<u32>,
    pub is_rewatching: Option<bool>,
    pub is_rereading: Option<bool>,
    pub num_times_rewatched: Option<u32>,
    pub num_times_reread: Option<u32>,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
    pub comments: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MalPaging {
    pub next: Option<String>,
}

// ── User profile response ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MalUser {
    pub id: u64,
    pub name: String,
    pub picture: Option<String>,
}

// ── Conversions ─────────────────────────────────────────────────

impl MalMediaNode {
    pub fn mapping(&self, media_type: MediaType) -> Mapping {
        Mapping::new(Provider::Mal, media_type, self.id.to_string())
    }

    pub fn into_record(self, media_type: MediaType) -> MediaRecord {
        let adult = matches!(self.nsfw.as_deref(), Some("black" | "gray"))
            || matches!(self.rating.as_deref(), Some("rx"));
        MediaRecord {
            mapping: Mapping::new(Provider::Mal, media_type, self.id.to_string()),
            title: MediaTitle {
                romaji: Some(self.title),
                english: self.alternative_titles.as_ref().and_then(|t| t.en.clone()),
                native: self.alternative_titles.and_then(|t| t.ja),
            },
            cover_url: self.main_picture.and_then(|p| p.large.or(p.medium)),
            banner_url: None,
            episodes: self.num_episodes,
            chapters: self.num_chapters,
            volumes: self.num_volumes,
            start_date: self.start_date,
            end_date: self.end_date,
            genres: self
                .genres
                .map(|g| g.into_iter().map(|x| x.name).collect())
                .unwrap_or_default(),
            format: self.media_type,
            airing_status: self.status,
            content_rating: self.rating,
            adult,
        }
    }
}

impl MalListItem {
    pub fn into_library_item(self, media_type: MediaType) -> LibraryItem {
        let mapping = self.node.mapping(media_type);
        let status = self.list_status;

        let mut entry = LibraryEntry::new(mapping.clone());
        let rewatching =
            status.is_rewatching.unwrap_or(false) || status.is_rereading.unwrap_or(false);
        entry.status = if rewatching {
            EntryStatus::InProgress
        } else {
            status
                .status
                .as_deref()
                .map(status_from_mal)
                .unwrap_or(EntryStatus::NotStarted)
        };
        // MAL scores are 0-10; 0 means unrated.
        entry.score = status
            .score
            .filter(|s| *s > 0)
            .map(|s| (s * 10).min(100) as u8);
        entry.progress = Progress {
            episodes: status.num_episodes_watched.unwrap_or(0),
            chapters: status.num_chapters_read.unwrap_or(0),
            volumes: status.num_volumes_read.unwrap_or(0),
        };
        entry.restarts = status
            .num_times_rewatched
            .or(status.num_times_reread)
            .unwrap_or(0);
        entry.started_at = status.start_date;
        entry.finished_at = status.finish_date;
        entry.notes = status.comments.unwrap_or_default();
        entry.updated_at = status
            .updated_at
            .as_deref()
            .and_then(parse_mal_timestamp)
            .unwrap_or_default();

        LibraryItem {
            media: self.node.into_record(media_type),
            entry,
            mappings: vec![mapping],
        }
    }
}

pub fn parse_mal_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub fn status_from_mal(status: &str) -> EntryStatus {
    match status {
        "watching" | "reading" => EntryStatus::InProgress,
        "plan_to_watch" | "plan_to_read" => EntryStatus::Planned,
        "completed" => EntryStatus::Completed,
        "on_hold" => EntryStatus::Paused,
        "dropped" => EntryStatus::Dropped,
        _ => EntryStatus::NotStarted,
    }
}

pub fn status_to_mal(status: EntryStatus, media_type: MediaType) -> &'static str {
    match (status, media_type) {
        (EntryStatus::InProgress, MediaType::Anime) => "watching",
        (EntryStatus::InProgress, MediaType::Manga) => "reading",
        (EntryStatus::Planned | EntryStatus::NotStarted, MediaType::Anime) => "plan_to_watch",
        (EntryStatus::Planned | EntryStatus::NotStarted, MediaType::Manga) => "plan_to_read",
        (EntryStatus::Completed, _) => "completed",
        (EntryStatus::Paused, _) => "on_hold",
        (EntryStatus::Dropped, _) => "dropped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_search_response() {
        let json = r#"{
            "data": [
                {
                    "node": {
                        "id": 52991,
                        "title": "Sousou no Frieren",
                        "main_picture": {
                            "medium": "https://cdn.myanimelist.net/images/anime/1/52991.jpg",
                            "large": "https://cdn.myanimelist.net/images/anime/1/52991l.jpg"
                        },
                        "alternative_titles": {
                            "en": "Frieren: Beyond Journey's End",
                            "ja": "葬送のフリーレン"
                        },
                        "num_episodes": 28,
                        "media_type": "tv",
                        "status": "finished_airing",
                        "genres": [{"id": 2, "name": "Adventure"}, {"id": 10, "name": "Fantasy"}],
                        "rating": "pg_13",
                        "start_date": "2023-09-29",
                        "end_date": "2024-03-22"
                    }
                }
            ]
        }"#;

        let resp: MalSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.len(), 1);

        let node = resp.data.into_iter().next().unwrap().node;
        assert_eq!(node.mapping(MediaType::Anime).remote_id, "52991");

        let record = node.into_record(MediaType::Anime);
        assert_eq!(record.title.preferred(), "Sousou no Frieren");
        assert_eq!(
            record.title.english.as_deref(),
            Some("Frieren: Beyond Journey's End")
        );
        assert_eq!(record.episodes, Some(28));
        assert_eq!(record.content_rating.as_deref(), Some("pg_13"));
        assert!(!record.adult);
    }

    #[test]
    fn test_deserialize_anime_list_item() {
        let json = r#"{
            "data": [
                {
                    "node": {
                        "id": 52991,
                        "title": "Sousou no Frieren",
                        "num_episodes": 28
                    },
                    "list_status": {
                        "status": "watching",
                        "score": 9,
                        "num_episodes_watched": 14,
                        "is_rewatching": false,
                        "updated_at": "2024-01-15T10:00:00+00:00",
                        "comments": "weekly"
                    }
                }
            ],
            "paging": { "next": "https://api.myanimelist.net/v2/users/@me/animelist?offset=100" }
        }"#;

        let resp: MalListResponse = serde_json::from_str(json).unwrap();
        assert!(resp.paging.next.is_some());

        let item = resp
            .data
            .into_iter()
            .next()
            .unwrap()
            .into_library_item(MediaType::Anime);
        assert_eq!(item.entry.status, EntryStatus::InProgress);
        assert_eq!(item.entry.score, Some(90));
        assert_eq!(item.entry.progress.episodes, 14);
        assert_eq!(item.entry.notes, "weekly");
        assert_eq!(item.entry.updated_at.timestamp(), 1705312800);
        assert_eq!(item.mappings.len(), 1);
        assert_eq!(item.entry.home.provider, Provider::Mal);
    }

    #[test]
    fn test_manga_list_item_progress() {
        let json = r#"{
            "node": { "id": 2, "title": "Berserk", "num_chapters": 0 },
            "list_status": {
                "status": "reading",
                "num_chapters_read": 120,
                "num_volumes_read": 14,
                "is_rereading": false
            }
        }"#;

        let item: MalListItem = serde_json::from_str(json).unwrap();
        let item = item.into_library_item(MediaType::Manga);
        assert_eq!(item.entry.status, EntryStatus::InProgress);
        assert_eq!(item.entry.progress.chapters, 120);
        assert_eq!(item.entry.progress.volumes, 14);
        assert_eq!(item.entry.home.media_type, MediaType::Manga);
    }

    #[test]
    fn test_rewatching_reads_as_in_progress() {
        let json = r#"{
            "node": { "id": 1, "title": "Cowboy Bebop" },
            "list_status": {
                "status": "completed",
                "is_rewatching": true,
                "num_times_rewatched": 2
            }
        }"#;

        let item: MalListItem = serde_json::from_str(json).unwrap();
        let item = item.into_library_item(MediaType::Anime);
        assert_eq!(item.entry.status, EntryStatus::InProgress);
        assert_eq!(item.entry.restarts, 2);
    }

    #[test]
    fn test_zero_score_means_unrated() {
        let json = r#"{
            "node": { "id": 1, "title": "Test" },
            "list_status": { "score": 0 }
        }"#;

        let item: MalListItem = serde_json::from_str(json).unwrap();
        let item = item.into_library_item(MediaType::Anime);
        assert_eq!(item.entry.score, None);
        assert_eq!(item.entry.status, EntryStatus::NotStarted);
    }

    #[test]
    fn test_status_round_trip() {
        for &status in EntryStatus::ALL {
            for &media_type in MediaType::ALL {
                let remote = status_to_mal(status, media_type);
                let back = status_from_mal(remote);
                if status == EntryStatus::NotStarted {
                    assert_eq!(back, EntryStatus::Planned);
                } else {
                    assert_eq!(back, status);
                }
            }
        }
    }
}
