use reqwest::Client;

use hibari_core::models::{ExternalAccount, LibraryEntry, Mapping, MediaType, Provider};
use hibari_core::service::{
    LibraryPage, MediaHit, RemoteUser, ServiceError, TrackerService,
};

use super::types::{
    status_to_mal, MalListResponse, MalMediaNode, MalSearchResponse, MalUser,
};

const BASE_URL: &str = "https://api.myanimelist.net";
const PAGE_LIMIT: u32 = 100;

/// Shared fields parameter for MAL anime queries.
const ANIME_FIELDS: &str = "id,title,alternative_titles,main_picture,num_episodes,media_type,\
                            status,genres,rating,nsfw,start_date,end_date";

/// Shared fields parameter for MAL manga queries.
const MANGA_FIELDS: &str = "id,title,alternative_titles,main_picture,num_chapters,num_volumes,\
                            media_type,status,genres,nsfw,start_date,end_date";

fn fields_for(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Anime => ANIME_FIELDS,
        MediaType::Manga => MANGA_FIELDS,
    }
}

fn path_for(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Anime => "anime",
        MediaType::Manga => "manga",
    }
}

fn list_path_for(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Anime => "animelist",
        MediaType::Manga => "mangalist",
    }
}

/// MyAnimeList API v2 client.
pub struct MalClient {
    client_id: String,
    http: Client,
}

impl MalClient {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            http: Client::new(),
        }
    }

    fn auth_header(account: &ExternalAccount) -> String {
        format!("Bearer {}", account.access_token)
    }

    /// Check the HTTP response for errors and return the body text on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "MAL API error");
            Err(ServiceError::Api {
                status,
                message: body,
            })
        }
    }

    fn own_mapping<'a>(mappings: &'a [Mapping]) -> Result<&'a Mapping, ServiceError> {
        mappings
            .iter()
            .find(|m| m.provider == Provider::Mal)
            .ok_or_else(|| ServiceError::Parse("no MAL mapping for entry".into()))
    }
}

impl TrackerService for MalClient {
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
    ) -> Result<Vec<MediaHit>, ServiceError> {
        let resp = self
            .http
            .get(format!("{BASE_URL}/v2/{}", path_for(media_type)))
            .header("X-MAL-CLIENT-ID", &self.client_id)
            .query(&[
                ("q", query),
                ("limit", "10"),
                ("fields", fields_for(media_type)),
                ("nsfw", "true"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let resp = Self::check_response(resp).await?;
        let search: MalSearchResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        Ok(search
            .data
            .into_iter()
            .map(|n| MediaHit {
                mappings: vec![n.node.mapping(media_type)],
                media: n.node.into_record(media_type),
            })
            .collect())
    }

    async fn get_media(
        &self,
        media_type: MediaType,
        remote_id: &str,
    ) -> Result<MediaHit, ServiceError> {
        let resp = self
            .http
            .get(format!(
                "{BASE_URL}/v2/{}/{remote_id}",
                path_for(media_type)
            ))
            .header("X-MAL-CLIENT-ID", &self.client_id)
            .query(&[("fields", fields_for(media_type))])
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let resp = Self::check_response(resp).await?;
        let node: MalMediaNode = resp
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        Ok(MediaHit {
            mappings: vec![node.mapping(media_type)],
            media: node.into_record(media_type),
        })
    }

    async fn library_page(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        page: u32,
    ) -> Result<LibraryPage, ServiceError> {
        let offset = page.saturating_sub(1) * PAGE_LIMIT;
        let url = format!(
            "{BASE_URL}/v2/users/@me/{}",
            list_path_for(media_type)
        );

        let resp = self
            .http
            .get(&url)
            .header("Authorization", Self::auth_header(account))
            .query(&[
                ("fields", format!("list_status,{}", fields_for(media_type))),
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                // Newest updates first, so incremental pulls can stop early.
                ("sort", "list_updated_at".to_string()),
                ("nsfw", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let resp = Self::check_response(resp).await?;
        let list: MalListResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        Ok(LibraryPage {
            has_next: list.paging.next.is_some(),
            items: list
                .data
                .into_iter()
                .map(|item| item.into_library_item(media_type))
                .collect(),
        })
    }

    async fn get_user(&self, account: &ExternalAccount) -> Result<RemoteUser, ServiceError> {
        let resp = self
            .http
            .get(format!("{BASE_URL}/v2/users/@me"))
            .header("Authorization", Self::auth_header(account))
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let resp = Self::check_response(resp).await?;
        let user: MalUser = resp
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        Ok(RemoteUser {
            remote_id: user.id.to_string(),
            display_name: user.name,
            avatar_url: user.picture,
        })
    }

    async fn update_entry(
        &self,
        account: &ExternalAccount,
        entry: &LibraryEntry,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        let mapping = Self::own_mapping(mappings)?;
        let url = format!(
            "{BASE_URL}/v2/{}/{}/my_list_status",
            path_for(entry.media_type),
            mapping.remote_id
        );

        // MAL wants a form-encoded PATCH; it doubles as an upsert.
        let mut params: Vec<(&str, String)> = vec![(
            "status",
            status_to_mal(entry.status, entry.media_type).to_string(),
        )];
        match entry.media_type {
            MediaType::Anime => {
                params.push(("num_watched_episodes", entry.progress.episodes.to_string()));
                params.push(("num_times_rewatched", entry.restarts.to_string()));
            }
            MediaType::Manga => {
                params.push(("num_chapters_read", entry.progress.chapters.to_string()));
                params.push(("num_volumes_read", entry.progress.volumes.to_string()));
                params.push(("num_times_reread", entry.restarts.to_string()));
            }
        }
        if let Some(score) = entry.score {
            // MAL uses the 0-10 scale.
            params.push(("score", (u32::from(score) / 10).min(10).to_string()));
        }
        if let Some(ref date) = entry.started_at {
            params.push(("start_date", date.clone()));
        }
        if let Some(ref date) = entry.finished_at {
            params.push(("finish_date", date.clone()));
        }
        if !entry.notes.is_empty() {
            params.push(("comments", entry.notes.clone()));
        }

        let resp = self
            .http
            .patch(&url)
            .header("Authorization", Self::auth_header(account))
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        Self::check_response(resp).await?;
        Ok(())
    }

    async fn remove_entry(
        &self,
        account: &ExternalAccount,
        media_type: MediaType,
        mappings: &[Mapping],
    ) -> Result<(), ServiceError> {
        let mapping = Self::own_mapping(mappings)?;
        let url = format!(
            "{BASE_URL}/v2/{}/{}/my_list_status",
            path_for(media_type),
            mapping.remote_id
        );

        let resp = self
            .http
            .delete(&url)
            .header("Authorization", Self::auth_header(account))
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        // 404 means the entry is already gone.
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check_response(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_mapping_picks_mal_id() {
        let mappings = vec![
            Mapping::new(Provider::AniList, MediaType::Anime, "154587"),
            Mapping::new(Provider::Mal, MediaType::Anime, "52991"),
        ];
        let m = MalClient::own_mapping(&mappings).unwrap();
        assert_eq!(m.remote_id, "52991");
    }

    #[test]
    fn test_page_offsets() {
        assert_eq!(1u32.saturating_sub(1) * PAGE_LIMIT, 0);
        assert_eq!(3u32.saturating_sub(1) * PAGE_LIMIT, 200);
    }
}
