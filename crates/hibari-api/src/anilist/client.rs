use std::collections::HashSet;

use reqwest::Client;

use hibari_core::models::{ExternalAccount, LibraryEntry, Mapping, MediaType, Provider};
use hibari_core::service::{
    LibraryItem, LibraryPage, MediaHit, RemoteUser, ServiceError, TrackerService,
};

use super::types::{
    media_type_to_anilist, status_to_anilist, GraphQLResponse, MediaListCollection,
    MediaListCollectionResponse, MediaListLookupResponse, MediaResponse, PageResponse,
    ViewerResponse,
};

const API_URL: &str = "https://graphql.anilist.co";

const MEDIA_FIELDS: &str = r#"
    id
    idMal
    title { romaji english native }
    episodes
    chapters
    volumes
    coverImage { large }
    bannerImage
    genres
    format
    status
    isAdult
    startDate { year month day }
    endDate { year month day }
"#;

fn search_query() -> String {
    format!(
        r#"
query ($search: String, $type: MediaType) {{
    Page(perPage: 10) {{
        media(search: $search, type: $type) {{ {MEDIA_FIELDS} }}
    }}
}}
"#
    )
}

fn media_query() -> String {
    format!(
        r#"
query ($id: Int, $type: MediaType) {{
    Media(id: $id, type: $type) {{ {MEDIA_FIELDS} }}
}}
"#
    )
}

fn list_chunk_query() -> String {
    format!(
        r#"
query ($userId: Int, $type: MediaType, $chunk: Int) {{
    MediaListCollection(userId: $userId, type: $type, chunk: $chunk, perChunk: 500,
                        sort: [UPDATED_TIME_DESC]) {{
        hasNextChunk
        lists {{
            entries {{
                progress
                progressVolumes
                score(format: POINT_100)
                status
                notes
                repeat
                private
                startedAt {{ year month day }}
                completedAt {{ year month day }}
                updatedAt
                media {{ isFavourite {MEDIA_FIELDS} }}
            }}
        }}
    }}
}}
"#
    )
}

const VIEWER_QUERY: &str = r#"
query {
    Viewer {
        id
        name
        avatar { large }
    }
}
"#;

const SAVE_ENTRY_MUTATION: &str = r#"
mutation ($mediaId: Int, $status: MediaListStatus, $progress: Int, $progressVolumes: Int,
          $score: Int, $startedAt: FuzzyDateInput, $completedAt: FuzzyDateInput,
          $notes: String, $repeat: Int, $private: Boolean) {
    SaveMediaListEntry(mediaId: $mediaId, status: $status, progress: $progress,
                       progressVolumes: $progressVolumes, scoreRaw: $score,
                       startedAt: $startedAt, completedAt: $completedAt,
                       notes: $notes, repeat: $repeat, private: $private) {
        id
    }
}
"#;

const FIND_ENTRY_QUERY: &str = r#"
query ($mediaId: Int, $type: MediaType) {
    MediaList(mediaId: $mediaId, type: $type) {
        id
    }
}
"#;

const DELETE_ENTRY_MUTATION: &str = r#"
mutation ($id: Int) {
    DeleteMediaListEntry(id: $id) {
        deleted
    }
}
"#;

/// AniList GraphQL API client.
pub struct AniListClient {
    http: Client,
}

impl AniListClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn graphql_request<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        token: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ServiceError> {
        tracing::debug!(operation, "AniList GraphQL request");

        // Search and media queries work unauthenticated; only send the
        // header when a token is present.
        let mut req = self.http.post(API_URL);
        if !token.is_empty() {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "query": query,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(operation, status = status_code, "AniList API error");
            return Err(ServiceError::Api {
                status: status_code,
                message: body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }

    async fn viewer(&self, token: &str) -> Result<ViewerResponse, ServiceError> {
        let resp: GraphQLResponse<ViewerResponse> = self
            .graphql_request("Viewer", token, VIEWER_QUERY, serde_json::json!({}))
            .await?;
        Ok(resp.data)
    }

    /// The remote id for this provider out of an entry's mapping set.
    fn own_mapping<'a>(mappings: &'a [Mapping]) -> Result<&'a Mapping, ServiceError> {
        mappings
            .iter()
            .find(|m| m.provider == Provider::AniList)
            .ok_or_else(|| ServiceError::Parse("no AniList mapping for entry".into()))
    }
}

impl Default for AniListClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerService for AniListClient {
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
    ) -> Result<Vec<MediaHit>, ServiceError> {
        let resp: GraphQLResponse<PageResponse> = self
            .graphql_request(
                "Search",
                "",
                &search_query(),
                serde_json::json!({
                    "search": query,
                    "type": media_type_to_anilist(media_type),
                }),
            )
            .await?;

        Ok(resp
            .data
            .page
            .media
            .into_iter()
            .map(|m| MediaHit {
                mappings: m.mappings(media_type),
                media: m.into_record(media_type),
            })
            .collect())
    }

    async fn get_media(
        &self,
        media_type: MediaType,
        remote_id: &str,
    ) -> Result<MediaHit, ServiceError> {
        let id: u64 = remote_id
            .parse()
            .map_err(|_| ServiceError::Parse(format!("bad AniList id: {remote_id}")))?;
        let resp: GraphQLResponse<MediaResponse> = self
            .graphql_request(
                "GetMedia",
                "",
                &media_query(),
                serde_json::json!({
                    "id": id,
                    "type": media_type_to_anilist(media_type),
                }),
            )
            .await?;

        let media = resp.data.media;
        Ok(MediaHit {
            mappings: media.mappings(media_type),
            media: media.into_record(media_type),
        })
    }

    async fn library_page(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        page: u32,
    ) -> Result<LibraryPage, ServiceError> {
        let user_id: u64 = match &account.remote_id {
            Some(id) => id
                .parse()
                .map_err(|_| ServiceError::Parse(format!("bad AniList user id: {id}")))?,
            None => self.viewer(&account.access_token).await?.viewer.id,
        };

        let resp: GraphQLResponse<MediaListCollectionResponse> = self
            .graphql_request(
                "ListChunk",
                &account.access_token,
                &list_chunk_query(),
                serde_json::json!({
                    "userId": user_id,
                    "type": media_type_to_anilist(media_type),
                    "chunk": page,
                }),
            )
            .await?;

        let collection = resp.data.media_list_collection;
        let has_next = collection.has_next_chunk.unwrap_or(false);
        let items = collect_chunk_items(collection, media_type);

        Ok(LibraryPage { items, has_next })
    }

    async fn get_user(&self, account: &ExternalAccount) -> Result<RemoteUser, ServiceError> {
        let viewer = self.viewer(&account.access_token).await?.viewer;
        Ok(RemoteUser {
            remote_id: viewer.id.to_string(),
            display_name: viewer.name,
            avatar_url: viewer.avatar.and_then(|a| a.large),
        })
    }

    async fn update_entry(
        &self,
        account: &ExternalAccount,
        entry: &LibraryEntry,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        let mapping = Self::own_mapping(mappings)?;
        let media_id: u64 = mapping
            .remote_id
            .parse()
            .map_err(|_| ServiceError::Parse(format!("bad AniList id: {}", mapping.remote_id)))?;

        // Null variables are ignored by AniList, so only set what we have.
        let mut vars = serde_json::json!({
            "mediaId": media_id,
            "status": status_to_anilist(entry.status),
            "private": entry.private,
            "repeat": entry.restarts,
        });
        match entry.media_type {
            MediaType::Anime => {
                vars["progress"] = serde_json::json!(entry.progress.episodes);
            }
            MediaType::Manga => {
                vars["progress"] = serde_json::json!(entry.progress.chapters);
                vars["progressVolumes"] = serde_json::json!(entry.progress.volumes);
            }
        }
        if let Some(score) = entry.score {
            vars["score"] = serde_json::json!(score);
        }
        if let Some(date) = fuzzy_date_input(entry.started_at.as_deref()) {
            vars["startedAt"] = date;
        }
        if let Some(date) = fuzzy_date_input(entry.finished_at.as_deref()) {
            vars["completedAt"] = date;
        }
        if !entry.notes.is_empty() {
            vars["notes"] = serde_json::json!(entry.notes);
        }

        let _: serde_json::Value = self
            .graphql_request("SaveEntry", &account.access_token, SAVE_ENTRY_MUTATION, vars)
            .await?;
        Ok(())
    }

    async fn remove_entry(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        let mapping = Self::own_mapping(mappings)?;
        let media_id: u64 = mapping
            .remote_id
            .parse()
            .map_err(|_| ServiceError::Parse(format!("bad AniList id: {}", mapping.remote_id)))?;

        // Deletion goes by list-entry id, so look it up first.
        let lookup: GraphQLResponse<MediaListLookupResponse> = match self
            .graphql_request(
                "FindEntry",
                &account.access_token,
                FIND_ENTRY_QUERY,
                serde_json::json!({
                    "mediaId": media_id,
                    "type": media_type_to_anilist(media_type),
                }),
            )
            .await
        {
            Ok(resp) => resp,
            // AniList answers 404 when the media is not on the list.
            Err(ServiceError::Api { status: 404, .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let Some(list_entry) = lookup.data.media_list else {
            return Ok(());
        };

        let _: serde_json::Value = self
            .graphql_request(
                "DeleteEntry",
                &account.access_token,
                DELETE_ENTRY_MUTATION,
                serde_json::json!({ "id": list_entry.id }),
            )
            .await?;
        Ok(())
    }
}

/// Flatten the chunk's list groups into one newest-first run with each
/// media appearing once. Custom lists repeat an entry across groups and
/// break the order the chunk sort promises.
fn collect_chunk_items(collection: MediaListCollection, media_type: MediaType) -> Vec<LibraryItem> {
    let mut items: Vec<_> = collection
        .lists
        .into_iter()
        .flat_map(|group| group.entries)
        .map(|e| e.into_library_item(media_type))
        .collect();
    items.sort_by(|a, b| b.entry.updated_at.cmp(&a.entry.updated_at));
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.entry.home.clone()));
    items
}

/// Build a FuzzyDateInput value from a `YYYY-MM-DD` string.
fn fuzzy_date_input(date: Option<&str>) -> Option<serde_json::Value> {
    let date = date?;
    let mut parts = date.splitn(3, '-');
    let year: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    Some(serde_json::json!({ "year": year, "month": month, "day": day }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_items_dedup_across_groups() {
        // 52991 sits in both the status list and a custom list; an
        // unrelated entry shares its timestamp and lands between the two
        // copies once the groups are flattened.
        let json = r#"{
            "lists": [
                { "entries": [
                    { "updatedAt": 1705312800, "media": { "id": 52991 } },
                    { "updatedAt": 1705312800, "media": { "id": 1000 } }
                ] },
                { "entries": [
                    { "updatedAt": 1705312800, "media": { "id": 52991 } }
                ] }
            ],
            "hasNextChunk": false
        }"#;
        let collection: MediaListCollection = serde_json::from_str(json).unwrap();

        let items = collect_chunk_items(collection, MediaType::Anime);

        assert_eq!(items.len(), 2);
        let homes: Vec<&str> = items.iter().map(|i| i.entry.home.remote_id.as_str()).collect();
        assert!(homes.contains(&"52991"));
        assert!(homes.contains(&"1000"));
    }

    #[test]
    fn test_fuzzy_date_input() {
        let v = fuzzy_date_input(Some("2023-09-29")).unwrap();
        assert_eq!(v["year"], 2023);
        assert_eq!(v["month"], 9);
        assert_eq!(v["day"], 29);

        assert!(fuzzy_date_input(None).is_none());
        assert!(fuzzy_date_input(Some("not a date")).is_none());
    }

    #[test]
    fn test_own_mapping_picks_anilist_id() {
        let mappings = vec![
            Mapping::new(Provider::Mal, MediaType::Anime, "52991"),
            Mapping::new(Provider::AniList, MediaType::Anime, "154587"),
        ];
        let m = AniListClient::own_mapping(&mappings).unwrap();
        assert_eq!(m.remote_id, "154587");

        let only_mal = vec![Mapping::new(Provider::Mal, MediaType::Anime, "52991")];
        assert!(AniListClient::own_mapping(&only_mal).is_err());
    }
}
