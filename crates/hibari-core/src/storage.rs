use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::HibariError;
use crate::models::{
    EntryStatus, ExternalAccount, LibraryEntry, Mapping, MappingSet, MediaList, MediaRecord,
    MediaTitle, MediaType, MissedSync, Progress, Provider, Review,
};

const SCHEMA_V1: &str = include_str!("../../../migrations/001_initial.sql");

const ENTRY_COLUMNS: &str = "provider, media_type, remote_id, favorite, status, score,
     episodes, chapters, volumes, restarts, started_at, finished_at,
     notes, private, updated_at, synced_accounts, missed_syncs";

/// Result of a bulk insert: how many rows landed, and which mappings were
/// skipped because an entry with that home mapping already existed.
#[derive(Debug, Default)]
pub struct BulkAddReport {
    pub inserted: usize,
    pub collisions: Vec<Mapping>,
}

/// SQLite-backed storage for the hibari library.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, HibariError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, HibariError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ── Mapping resolution ──────────────────────────────────────

    /// Fold a batch of co-referenced mappings into the disjoint-set store.
    ///
    /// Runs in one transaction: the read-check-write sequence must be
    /// atomic so an interrupted resolve can never leave a mapping in two
    /// sets. Zero intersecting sets creates a new one; exactly one grows
    /// in place; several collapse into a fresh set and the absorbed set
    /// rows are deleted. Mappings are never removed from a set.
    pub fn resolve_mappings(&self, mappings: &[Mapping]) -> Result<MappingSet, HibariError> {
        if mappings.is_empty() {
            return Err(HibariError::NotFound("empty mapping batch".into()));
        }

        let tx = self.conn.unchecked_transaction()?;

        let mut matched: Vec<i64> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT set_id FROM mapping
                 WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
            )?;
            for m in mappings {
                let set_id: Option<i64> = stmt
                    .query_row(
                        params![m.provider.as_db_str(), m.media_type.as_db_str(), m.remote_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(id) = set_id {
                    if !matched.contains(&id) {
                        matched.push(id);
                    }
                }
            }
        }

        let set_id = match matched.len() {
            0 => {
                tx.execute("INSERT INTO mapping_set DEFAULT VALUES", [])?;
                tx.last_insert_rowid()
            }
            1 => matched[0],
            _ => {
                // Collision: independently created sets turned out to refer
                // to the same media. Union everything into a fresh set.
                tx.execute("INSERT INTO mapping_set DEFAULT VALUES", [])?;
                let new_id = tx.last_insert_rowid();
                for old_id in &matched {
                    tx.execute(
                        "UPDATE mapping SET set_id = ?1 WHERE set_id = ?2",
                        params![new_id, old_id],
                    )?;
                    tx.execute("DELETE FROM mapping_set WHERE id = ?1", params![old_id])?;
                }
                debug!(absorbed = matched.len(), set_id = new_id, "merged colliding mapping sets");
                new_id
            }
        };

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO mapping (set_id, provider, media_type, remote_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for m in mappings {
                insert.execute(params![
                    set_id,
                    m.provider.as_db_str(),
                    m.media_type.as_db_str(),
                    m.remote_id,
                ])?;
            }
        }

        let members = set_members(&tx, set_id)?;
        tx.commit()?;

        Ok(MappingSet {
            id: set_id,
            mappings: members,
        })
    }

    /// Look up the set a mapping belongs to, if any.
    pub fn find_set(&self, mapping: &Mapping) -> Result<Option<MappingSet>, HibariError> {
        let set_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT set_id FROM mapping
                 WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
                params![
                    mapping.provider.as_db_str(),
                    mapping.media_type.as_db_str(),
                    mapping.remote_id,
                ],
                |row| row.get(0),
            )
            .optional()?;

        match set_id {
            Some(id) => Ok(Some(MappingSet {
                id,
                mappings: set_members(&self.conn, id)?,
            })),
            None => Ok(None),
        }
    }

    /// Total number of mapping sets (for tests and diagnostics).
    pub fn mapping_set_count(&self) -> Result<u32, HibariError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM mapping_set", [], |row| row.get(0))
            .map_err(Into::into)
    }

    // ── Media records ───────────────────────────────────────────

    /// Insert or overwrite the snapshot for this record's mapping.
    pub fn upsert_media_record(&self, record: &MediaRecord) -> Result<(), HibariError> {
        let genres_json = serde_json::to_string(&record.genres).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO media_record (provider, media_type, remote_id, title_romaji,
             title_english, title_native, cover_url, banner_url, episodes, chapters,
             volumes, start_date, end_date, genres, format, airing_status,
             content_rating, adult)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18)
             ON CONFLICT(provider, media_type, remote_id) DO UPDATE SET
               title_romaji = excluded.title_romaji,
               title_english = excluded.title_english,
               title_native = excluded.title_native,
               cover_url = excluded.cover_url,
               banner_url = excluded.banner_url,
               episodes = excluded.episodes,
               chapters = excluded.chapters,
               volumes = excluded.volumes,
               start_date = excluded.start_date,
               end_date = excluded.end_date,
               genres = excluded.genres,
               format = excluded.format,
               airing_status = excluded.airing_status,
               content_rating = excluded.content_rating,
               adult = excluded.adult",
            params![
                record.mapping.provider.as_db_str(),
                record.mapping.media_type.as_db_str(),
                record.mapping.remote_id,
                record.title.romaji,
                record.title.english,
                record.title.native,
                record.cover_url,
                record.banner_url,
                record.episodes,
                record.chapters,
                record.volumes,
                record.start_date,
                record.end_date,
                genres_json,
                record.format,
                record.airing_status,
                record.content_rating,
                record.adult as i32,
            ],
        )?;
        Ok(())
    }

    /// Get the snapshot fetched through a specific mapping.
    pub fn get_media_record(&self, mapping: &Mapping) -> Result<Option<MediaRecord>, HibariError> {
        self.conn
            .query_row(
                "SELECT provider, media_type, remote_id, title_romaji, title_english,
                 title_native, cover_url, banner_url, episodes, chapters, volumes,
                 start_date, end_date, genres, format, airing_status, content_rating,
                 adult
                 FROM media_record
                 WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
                params![
                    mapping.provider.as_db_str(),
                    mapping.media_type.as_db_str(),
                    mapping.remote_id,
                ],
                |row| Ok(row_to_media_record(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    // ── Library entries ─────────────────────────────────────────

    /// Insert or update a library entry, keyed by its home mapping.
    pub fn upsert_library_entry(&self, entry: &LibraryEntry) -> Result<(), HibariError> {
        self.conn.execute(
            "INSERT INTO library_entry (provider, media_type, remote_id, favorite,
             status, score, episodes, chapters, volumes, restarts, started_at,
             finished_at, notes, private, updated_at, synced_accounts, missed_syncs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17)
             ON CONFLICT(provider, media_type, remote_id) DO UPDATE SET
               favorite = excluded.favorite,
               status = excluded.status,
               score = excluded.score,
               episodes = excluded.episodes,
               chapters = excluded.chapters,
               volumes = excluded.volumes,
               restarts = excluded.restarts,
               started_at = excluded.started_at,
               finished_at = excluded.finished_at,
               notes = excluded.notes,
               private = excluded.private,
               updated_at = excluded.updated_at,
               synced_accounts = excluded.synced_accounts,
               missed_syncs = excluded.missed_syncs",
            entry_params(entry),
        )?;
        Ok(())
    }

    /// Get the entry stored under a specific home mapping.
    pub fn get_library_entry(&self, mapping: &Mapping) -> Result<Option<LibraryEntry>, HibariError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM library_entry
                     WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3"
                ),
                params![
                    mapping.provider.as_db_str(),
                    mapping.media_type.as_db_str(),
                    mapping.remote_id,
                ],
                |row| Ok(row_to_entry(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get the entry whose home mapping belongs to the given set.
    ///
    /// A late set merge can leave more than one entry in a set; the most
    /// recently updated one wins the lookup.
    pub fn entry_for_set(&self, set_id: i64) -> Result<Option<LibraryEntry>, HibariError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT le.provider, le.media_type, le.remote_id, le.favorite,
                     le.status, le.score, le.episodes, le.chapters, le.volumes,
                     le.restarts, le.started_at, le.finished_at, le.notes, le.private,
                     le.updated_at, le.synced_accounts, le.missed_syncs
                     FROM library_entry le
                     JOIN mapping m ON m.provider = le.provider
                                   AND m.media_type = le.media_type
                                   AND m.remote_id = le.remote_id
                     WHERE m.set_id = ?1
                     ORDER BY le.updated_at DESC
                     LIMIT 1"
                ),
                params![set_id],
                |row| Ok(row_to_entry(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    /// All entries, most recently updated first.
    pub fn all_library_entries(&self) -> Result<Vec<LibraryEntry>, HibariError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM library_entry ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_entry(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All entries with a given status.
    pub fn entries_by_status(&self, status: EntryStatus) -> Result<Vec<LibraryEntry>, HibariError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM library_entry
             WHERE status = ?1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![status.as_db_str()], |row| Ok(row_to_entry(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete the entry stored under a home mapping.
    pub fn delete_library_entry(&self, mapping: &Mapping) -> Result<(), HibariError> {
        self.conn.execute(
            "DELETE FROM library_entry
             WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
            params![
                mapping.provider.as_db_str(),
                mapping.media_type.as_db_str(),
                mapping.remote_id,
            ],
        )?;
        Ok(())
    }

    /// Insert-only batch write. A row that collides with an existing home
    /// mapping is reported and skipped; the rest of the batch still
    /// commits.
    pub fn bulk_add_entries(&self, entries: &[LibraryEntry]) -> Result<BulkAddReport, HibariError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut report = BulkAddReport::default();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO library_entry (provider, media_type, remote_id, favorite,
                 status, score, episodes, chapters, volumes, restarts, started_at,
                 finished_at, notes, private, updated_at, synced_accounts, missed_syncs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17)",
            )?;
            for entry in entries {
                match stmt.execute(entry_params(entry)) {
                    Ok(_) => report.inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        report.collisions.push(entry.home.clone());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;
        if !report.collisions.is_empty() {
            debug!(skipped = report.collisions.len(), "bulk add skipped colliding entries");
        }
        Ok(report)
    }

    /// Upsert a whole batch in one transaction.
    pub fn bulk_upsert_entries(&self, entries: &[LibraryEntry]) -> Result<(), HibariError> {
        let tx = self.conn.unchecked_transaction()?;
        for entry in entries {
            tx.execute(
                "INSERT INTO library_entry (provider, media_type, remote_id, favorite,
                 status, score, episodes, chapters, volumes, restarts, started_at,
                 finished_at, notes, private, updated_at, synced_accounts, missed_syncs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17)
                 ON CONFLICT(provider, media_type, remote_id) DO UPDATE SET
                   favorite = excluded.favorite,
                   status = excluded.status,
                   score = excluded.score,
                   episodes = excluded.episodes,
                   chapters = excluded.chapters,
                   volumes = excluded.volumes,
                   restarts = excluded.restarts,
                   started_at = excluded.started_at,
                   finished_at = excluded.finished_at,
                   notes = excluded.notes,
                   private = excluded.private,
                   updated_at = excluded.updated_at,
                   synced_accounts = excluded.synced_accounts,
                   missed_syncs = excluded.missed_syncs",
                entry_params(entry),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Accounts ────────────────────────────────────────────────

    /// Link a new external account, returning its id.
    pub fn insert_account(&self, account: &ExternalAccount) -> Result<i64, HibariError> {
        let syncing_json = serde_json::to_string(&account.syncing).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO account (provider, access_token, refresh_token, expires_at,
             remote_id, display_name, avatar_url, syncing, auth_valid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.provider.as_db_str(),
                account.access_token,
                account.refresh_token,
                account.expires_at,
                account.remote_id,
                account.display_name,
                account.avatar_url,
                syncing_json,
                account.auth_valid as i32,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_account(&self, id: i64) -> Result<Option<ExternalAccount>, HibariError> {
        self.conn
            .query_row(
                "SELECT id, provider, access_token, refresh_token, expires_at,
                 remote_id, display_name, avatar_url, syncing, auth_valid
                 FROM account WHERE id = ?1",
                params![id],
                |row| Ok(row_to_account(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_accounts(&self) -> Result<Vec<ExternalAccount>, HibariError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, provider, access_token, refresh_token, expires_at,
             remote_id, display_name, avatar_url, syncing, auth_valid
             FROM account ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_account(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Update remote profile fields after a `get_user` refresh.
    pub fn update_account_profile(
        &self,
        id: i64,
        remote_id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<(), HibariError> {
        self.conn.execute(
            "UPDATE account SET remote_id = ?1, display_name = ?2, avatar_url = ?3
             WHERE id = ?4",
            params![remote_id, display_name, avatar_url, id],
        )?;
        Ok(())
    }

    /// Store fresh token material after an external re-authentication.
    pub fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<(), HibariError> {
        self.conn.execute(
            "UPDATE account SET access_token = ?1, refresh_token = ?2, expires_at = ?3,
             auth_valid = 1
             WHERE id = ?4",
            params![access_token, refresh_token, expires_at, id],
        )?;
        Ok(())
    }

    /// Replace the set of media types the account syncs.
    pub fn set_account_syncing(&self, id: i64, syncing: &[MediaType]) -> Result<(), HibariError> {
        let syncing_json = serde_json::to_string(syncing).unwrap_or_default();
        self.conn.execute(
            "UPDATE account SET syncing = ?1 WHERE id = ?2",
            params![syncing_json, id],
        )?;
        Ok(())
    }

    /// Flip the credential-validity flag. Cleared on terminal auth failure
    /// so sync stops attempting the account.
    pub fn set_account_auth_valid(&self, id: i64, valid: bool) -> Result<(), HibariError> {
        self.conn.execute(
            "UPDATE account SET auth_valid = ?1 WHERE id = ?2",
            params![valid as i32, id],
        )?;
        Ok(())
    }

    pub fn delete_account(&self, id: i64) -> Result<(), HibariError> {
        self.conn
            .execute("DELETE FROM account WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Import checkpoints ──────────────────────────────────────

    /// Record when this account's library of the given type was last
    /// pulled to completion.
    pub fn set_import_checkpoint(
        &self,
        account_id: i64,
        media_type: MediaType,
        imported_at: DateTime<Utc>,
    ) -> Result<(), HibariError> {
        self.conn.execute(
            "INSERT INTO import_checkpoint (account_id, media_type, imported_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id, media_type) DO UPDATE SET
                imported_at = excluded.imported_at",
            params![account_id, media_type.as_db_str(), imported_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn import_checkpoint(
        &self,
        account_id: i64,
        media_type: MediaType,
    ) -> Result<Option<DateTime<Utc>>, HibariError> {
        let ts: Option<String> = self
            .conn
            .query_row(
                "SELECT imported_at FROM import_checkpoint
                 WHERE account_id = ?1 AND media_type = ?2",
                params![account_id, media_type.as_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts.as_deref().map(parse_datetime))
    }

    // ── Lists ───────────────────────────────────────────────────

    /// Create a named list, returning its id.
    pub fn create_list(&self, name: &str) -> Result<i64, HibariError> {
        self.conn
            .execute("INSERT INTO list (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn rename_list(&self, id: i64, name: &str) -> Result<(), HibariError> {
        self.conn
            .execute("UPDATE list SET name = ?1 WHERE id = ?2", params![name, id])?;
        Ok(())
    }

    pub fn delete_list(&self, id: i64) -> Result<(), HibariError> {
        self.conn
            .execute("DELETE FROM list WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Add a mapping to a list. Duplicate membership is a no-op.
    pub fn add_list_item(&self, list_id: i64, mapping: &Mapping) -> Result<(), HibariError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO list_item (list_id, provider, media_type, remote_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                list_id,
                mapping.provider.as_db_str(),
                mapping.media_type.as_db_str(),
                mapping.remote_id,
            ],
        )?;
        Ok(())
    }

    pub fn remove_list_item(&self, list_id: i64, mapping: &Mapping) -> Result<(), HibariError> {
        self.conn.execute(
            "DELETE FROM list_item
             WHERE list_id = ?1 AND provider = ?2 AND media_type = ?3 AND remote_id = ?4",
            params![
                list_id,
                mapping.provider.as_db_str(),
                mapping.media_type.as_db_str(),
                mapping.remote_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_lists(&self) -> Result<Vec<MediaList>, HibariError> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM list ORDER BY name")?;
        let heads: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut lists = Vec::with_capacity(heads.len());
        for (id, name) in heads {
            lists.push(MediaList {
                id,
                name,
                items: self.list_items(id)?,
            });
        }
        Ok(lists)
    }

    fn list_items(&self, list_id: i64) -> Result<Vec<Mapping>, HibariError> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, media_type, remote_id FROM list_item WHERE list_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![list_id], |row| Ok(row_to_mapping(row, 0)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Reviews ─────────────────────────────────────────────────

    pub fn upsert_review(&self, review: &Review) -> Result<(), HibariError> {
        self.conn.execute(
            "INSERT INTO review (provider, media_type, remote_id, characters,
             illustration, soundtrack, animation, creativity, voice, writing,
             engagement, overall, summary, body, spoiler, private, recommendation,
             updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18)
             ON CONFLICT(provider, media_type, remote_id) DO UPDATE SET
               characters = excluded.characters,
               illustration = excluded.illustration,
               soundtrack = excluded.soundtrack,
               animation = excluded.animation,
               creativity = excluded.creativity,
               voice = excluded.voice,
               writing = excluded.writing,
               engagement = excluded.engagement,
               overall = excluded.overall,
               summary = excluded.summary,
               body = excluded.body,
               spoiler = excluded.spoiler,
               private = excluded.private,
               recommendation = excluded.recommendation,
               updated_at = excluded.updated_at",
            params![
                review.mapping.provider.as_db_str(),
                review.mapping.media_type.as_db_str(),
                review.mapping.remote_id,
                review.characters,
                review.illustration,
                review.soundtrack,
                review.animation,
                review.creativity,
                review.voice,
                review.writing,
                review.engagement,
                review.overall,
                review.summary,
                review.body,
                review.spoiler as i32,
                review.private as i32,
                review.recommendation,
                review.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_review(&self, mapping: &Mapping) -> Result<Option<Review>, HibariError> {
        self.conn
            .query_row(
                "SELECT provider, media_type, remote_id, characters, illustration,
                 soundtrack, animation, creativity, voice, writing, engagement,
                 overall, summary, body, spoiler, private, recommendation, updated_at
                 FROM review
                 WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
                params![
                    mapping.provider.as_db_str(),
                    mapping.media_type.as_db_str(),
                    mapping.remote_id,
                ],
                |row| Ok(row_to_review(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn delete_review(&self, mapping: &Mapping) -> Result<(), HibariError> {
        self.conn.execute(
            "DELETE FROM review
             WHERE provider = ?1 AND media_type = ?2 AND remote_id = ?3",
            params![
                mapping.provider.as_db_str(),
                mapping.media_type.as_db_str(),
                mapping.remote_id,
            ],
        )?;
        Ok(())
    }
}

// ── Migrations ──────────────────────────────────────────────────

/// Run schema migrations using `PRAGMA user_version` for version tracking.
fn run_migrations(conn: &Connection) -> Result<(), HibariError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────

/// All member mappings of a set. Takes `&Connection` so it works both
/// inside and outside a transaction.
fn set_members(conn: &Connection, set_id: i64) -> Result<Vec<Mapping>, HibariError> {
    let mut stmt = conn.prepare(
        "SELECT provider, media_type, remote_id FROM mapping WHERE set_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![set_id], |row| Ok(row_to_mapping(row, 0)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Parse a datetime string from SQLite (RFC 3339 expected).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn entry_params(entry: &LibraryEntry) -> [Box<dyn rusqlite::ToSql>; 17] {
    let synced_json = serde_json::to_string(&entry.synced_accounts).unwrap_or_default();
    let missed_json = serde_json::to_string(&entry.missed_syncs).unwrap_or_else(|e| {
        warn!("failed to serialize missed syncs: {e}");
        "[]".into()
    });
    [
        Box::new(entry.home.provider.as_db_str()),
        Box::new(entry.home.media_type.as_db_str()),
        Box::new(entry.home.remote_id.clone()),
        Box::new(entry.favorite as i32),
        Box::new(entry.status.as_db_str()),
        Box::new(entry.score),
        Box::new(entry.progress.episodes),
        Box::new(entry.progress.chapters),
        Box::new(entry.progress.volumes),
        Box::new(entry.restarts),
        Box::new(entry.started_at.clone()),
        Box::new(entry.finished_at.clone()),
        Box::new(entry.notes.clone()),
        Box::new(entry.private as i32),
        Box::new(entry.updated_at.to_rfc3339()),
        Box::new(synced_json),
        Box::new(missed_json),
    ]
}

// ── Row mapping helpers ─────────────────────────────────────────

fn row_to_mapping(row: &rusqlite::Row<'_>, off: usize) -> Mapping {
    let provider_str: String = row.get(off).unwrap_or_default();
    let type_str: String = row.get(off + 1).unwrap_or_default();
    Mapping {
        provider: Provider::from_db_str(&provider_str).unwrap_or(Provider::AniList),
        media_type: MediaType::from_db_str(&type_str).unwrap_or(MediaType::Anime),
        remote_id: row.get(off + 2).unwrap_or_default(),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> LibraryEntry {
    let mapping = row_to_mapping(row, 0);
    let status_str: String = row.get(4).unwrap_or_default();
    let updated_str: String = row.get(14).unwrap_or_default();
    let synced_str: String = row.get(15).unwrap_or_default();
    let missed_str: String = row.get(16).unwrap_or_default();

    LibraryEntry {
        media_type: mapping.media_type,
        home: mapping,
        favorite: row.get::<_, i32>(3).unwrap_or(0) != 0,
        status: EntryStatus::from_db_str(&status_str).unwrap_or(EntryStatus::NotStarted),
        score: row.get(5).unwrap_or(None),
        progress: Progress {
            episodes: row.get(6).unwrap_or(0),
            chapters: row.get(7).unwrap_or(0),
            volumes: row.get(8).unwrap_or(0),
        },
        restarts: row.get(9).unwrap_or(0),
        started_at: row.get(10).unwrap_or(None),
        finished_at: row.get(11).unwrap_or(None),
        notes: row.get(12).unwrap_or_default(),
        private: row.get::<_, i32>(13).unwrap_or(0) != 0,
        updated_at: parse_datetime(&updated_str),
        synced_accounts: serde_json::from_str(&synced_str).unwrap_or_default(),
        missed_syncs: serde_json::from_str::<Vec<MissedSync>>(&missed_str).unwrap_or_default(),
    }
}

fn row_to_media_record(row: &rusqlite::Row<'_>) -> MediaRecord {
    let genres_str: String = row.get(13).unwrap_or_default();
    MediaRecord {
        mapping: row_to_mapping(row, 0),
        title: MediaTitle {
            romaji: row.get(3).unwrap_or(None),
            english: row.get(4).unwrap_or(None),
            native: row.get(5).unwrap_or(None),
        },
        cover_url: row.get(6).unwrap_or(None),
        banner_url: row.get(7).unwrap_or(None),
        episodes: row.get(8).unwrap_or(None),
        chapters: row.get(9).unwrap_or(None),
        volumes: row.get(10).unwrap_or(None),
        start_date: row.get(11).unwrap_or(None),
        end_date: row.get(12).unwrap_or(None),
        genres: serde_json::from_str(&genres_str).unwrap_or_default(),
        format: row.get(14).unwrap_or(None),
        airing_status: row.get(15).unwrap_or(None),
        content_rating: row.get(16).unwrap_or(None),
        adult: row.get::<_, i32>(17).unwrap_or(0) != 0,
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> ExternalAccount {
    let provider_str: String = row.get(1).unwrap_or_default();
    let syncing_str: String = row.get(8).unwrap_or_default();
    ExternalAccount {
        id: row.get(0).unwrap_or(0),
        provider: Provider::from_db_str(&provider_str).unwrap_or(Provider::AniList),
        access_token: row.get(2).unwrap_or_default(),
        refresh_token: row.get(3).unwrap_or(None),
        expires_at: row.get(4).unwrap_or(None),
        remote_id: row.get(5).unwrap_or(None),
        display_name: row.get(6).unwrap_or(None),
        avatar_url: row.get(7).unwrap_or(None),
        syncing: serde_json::from_str(&syncing_str).unwrap_or_default(),
        auth_valid: row.get::<_, i32>(9).unwrap_or(0) != 0,
    }
}

fn row_to_review(row: &rusqlite::Row<'_>) -> Review {
    let updated_str: String = row.get(17).unwrap_or_default();
    Review {
        mapping: row_to_mapping(row, 0),
        characters: row.get(3).unwrap_or(None),
        illustration: row.get(4).unwrap_or(None),
        soundtrack: row.get(5).unwrap_or(None),
        animation: row.get(6).unwrap_or(None),
        creativity: row.get(7).unwrap_or(None),
        voice: row.get(8).unwrap_or(None),
        writing: row.get(9).unwrap_or(None),
        engagement: row.get(10).unwrap_or(None),
        overall: row.get(11).unwrap_or(None),
        summary: row.get(12).unwrap_or(None),
        body: row.get(13).unwrap_or(None),
        spoiler: row.get::<_, i32>(14).unwrap_or(0) != 0,
        private: row.get::<_, i32>(15).unwrap_or(0) != 0,
        recommendation: row.get(16).unwrap_or(None),
        updated_at: parse_datetime(&updated_str),
    }
}
