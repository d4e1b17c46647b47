//! Database module for Disappearo
//!
//! Provides persistence for profiles, chat requests, sessions, messages and
//! delivered exports.

mod schema;

pub use schema::*;

use crate::lifecycle::{self, chat_request, StrikeOutcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

const HANDLE_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),
    #[error("Chat request not found: {0}")]
    RequestNotFound(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Export not found: {0}")]
    ExportNotFound(String),
    #[error("Could not allocate a unique handle")]
    HandleExhausted,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Profile Operations ====================

    /// Fetch the profile for an authenticated user, creating it on first use
    pub fn get_or_create_profile(&self, user_id: &str) -> DbResult<Profile> {
        if let Some(profile) = self.find_profile("user_id", user_id)? {
            return self.settle_ban(profile);
        }

        let now = Utc::now();
        let conn = self.lock();
        for _ in 0..HANDLE_ATTEMPTS {
            let handle = lifecycle::generate_handle();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO profiles (user_id, handle, strikes, banned, banned_at, created_at)
                 VALUES (?1, ?2, 0, 0, NULL, ?3)",
                params![user_id, handle, now.to_rfc3339()],
            )?;
            if inserted == 1 {
                tracing::info!(user_id, handle = %handle, "Created profile");
                return Ok(Profile {
                    user_id: user_id.to_string(),
                    handle,
                    strikes: 0,
                    banned: false,
                    banned_at: None,
                    created_at: now,
                });
            }
        }
        Err(DbError::HandleExhausted)
    }

    /// Get a profile by handle, lifting an elapsed ban on the way
    pub fn get_profile(&self, handle: &str) -> DbResult<Profile> {
        let profile = self
            .find_profile("handle", handle)?
            .ok_or_else(|| DbError::ProfileNotFound(handle.to_string()))?;
        self.settle_ban(profile)
    }

    /// Record a moderation strike against a handle
    pub fn record_strike(&self, handle: &str) -> DbResult<(Profile, StrikeOutcome)> {
        let mut profile = self.get_profile(handle)?;
        let outcome = profile.record_strike(Utc::now());
        self.save_profile_moderation(&profile)?;
        Ok((profile, outcome))
    }

    fn settle_ban(&self, mut profile: Profile) -> DbResult<Profile> {
        if profile.lift_expired_ban(Utc::now()) {
            tracing::info!(handle = %profile.handle, "Ban expired, strikes reset");
            self.save_profile_moderation(&profile)?;
        }
        Ok(profile)
    }

    fn save_profile_moderation(&self, profile: &Profile) -> DbResult<()> {
        self.lock().execute(
            "UPDATE profiles SET strikes = ?1, banned = ?2, banned_at = ?3 WHERE handle = ?4",
            params![
                profile.strikes,
                profile.banned,
                profile.banned_at.map(|t| t.to_rfc3339()),
                profile.handle
            ],
        )?;
        Ok(())
    }

    fn find_profile(&self, column: &str, value: &str) -> DbResult<Option<Profile>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT user_id, handle, strikes, banned, banned_at, created_at
             FROM profiles WHERE {column} = ?1"
        );
        conn.query_row(&sql, params![value], parse_profile_row)
            .optional()
            .map_err(DbError::from)
    }

    // ==================== Chat Request Operations ====================

    pub fn create_chat_request(&self, from: &str, to: &str) -> DbResult<ChatRequest> {
        let now = Utc::now();
        let request = ChatRequest {
            id: uuid::Uuid::new_v4().simple().to_string(),
            from_handle: from.to_string(),
            to_handle: to.to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            expires_at: chat_request::expires_at(now),
        };

        self.lock().execute(
            "INSERT INTO chat_requests (id, from_handle, to_handle, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id,
                request.from_handle,
                request.to_handle,
                request.status.as_str(),
                request.created_at.to_rfc3339(),
                request.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(request)
    }

    pub fn get_chat_request(&self, id: &str) -> DbResult<ChatRequest> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, from_handle, to_handle, status, created_at, expires_at
             FROM chat_requests WHERE id = ?1",
            params![id],
            parse_request_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::RequestNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// Pending, unexpired requests addressed to `handle`
    pub fn list_incoming_requests(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<ChatRequest>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, from_handle, to_handle, status, created_at, expires_at
             FROM chat_requests WHERE to_handle = ?1 AND status = 'pending'
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![handle], parse_request_row)?;
        let requests = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(requests.into_iter().filter(|r| !r.is_expired(now)).collect())
    }

    /// Pending or accepted requests sent by `handle`
    pub fn list_outgoing_requests(&self, handle: &str) -> DbResult<Vec<ChatRequest>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, from_handle, to_handle, status, created_at, expires_at
             FROM chat_requests WHERE from_handle = ?1 AND status IN ('pending', 'accepted')
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![handle], parse_request_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn update_request_status(&self, id: &str, status: RequestStatus) -> DbResult<()> {
        let updated = self.lock().execute(
            "UPDATE chat_requests SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(DbError::RequestNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Mark every pending request past its expiry as expired
    pub fn expire_stale_requests(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, expires_at FROM chat_requests WHERE status = 'pending'",
        )?;
        let pending = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let stale: Vec<String> = pending
            .into_iter()
            .filter(|(_, expires_at)| parse_datetime(expires_at) <= now)
            .map(|(id, _)| id)
            .collect();

        for id in &stale {
            conn.execute(
                "UPDATE chat_requests SET status = 'expired' WHERE id = ?1",
                params![id],
            )?;
        }
        Ok(stale.len())
    }

    // ==================== Session Operations ====================

    /// Open a session that expires `ttl` after creation
    pub fn create_session(&self, id: &str, a: &str, b: &str, ttl: Duration) -> DbResult<Session> {
        let now = Utc::now();
        let expires_at = lifecycle::session_expires_at(now, ttl);
        self.lock().execute(
            "INSERT INTO sessions (id, participant_a, participant_b, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, a, b, now.to_rfc3339(), expires_at.to_rfc3339()],
        )?;
        Ok(Session {
            id: id.to_string(),
            participants: [a.to_string(), b.to_string()],
            created_at: now,
            expires_at,
        })
    }

    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, participant_a, participant_b, created_at, expires_at
             FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    participants: [row.get(1)?, row.get(2)?],
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    expires_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// Delete a session together with its messages and exports
    pub fn delete_session(&self, id: &str) -> DbResult<()> {
        let conn = self.lock();
        if !purge_session(&conn, id)? {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete every session past its expiry; returns the deleted ids
    pub fn expire_sessions(&self, now: DateTime<Utc>) -> DbResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, expires_at FROM sessions")?;
        let sessions = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut expired = Vec::new();
        for (id, expires_at) in sessions {
            if parse_datetime(&expires_at) <= now && purge_session(&conn, &id)? {
                expired.push(id);
            }
        }
        Ok(expired)
    }

    // ==================== Message Operations ====================

    /// Append a message to a session
    ///
    /// The `id` is the canonical identifier within the session, usually
    /// generated by the client so retries stay idempotent. Returns the stored
    /// message and whether this call inserted it; for an id the session
    /// already holds, the existing row is returned untouched.
    pub fn add_message(
        &self,
        id: &str,
        session_id: &str,
        sender: &str,
        text: &str,
    ) -> DbResult<(Message, bool)> {
        let conn = self.lock();
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (id, session_id, sequence_id, sender, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, session_id, sequence_id, sender, text, now.to_rfc3339()],
        )?;

        if inserted == 0 {
            let existing = query_message(&conn, session_id, id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            return Ok((existing, false));
        }

        let message = Message {
            id: id.to_string(),
            session_id: session_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            created_at: now,
        };
        Ok((message, true))
    }

    /// Get messages for a session in creation order
    pub fn get_messages(&self, session_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sender, text, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_message(&self, session_id: &str, id: &str) -> DbResult<Option<Message>> {
        query_message(&self.lock(), session_id, id).map_err(DbError::from)
    }

    /// Remove one message; returns false if it did not exist
    pub fn delete_message(&self, session_id: &str, id: &str) -> DbResult<bool> {
        let deleted = self.lock().execute(
            "DELETE FROM messages WHERE session_id = ?1 AND id = ?2",
            params![session_id, id],
        )?;
        Ok(deleted > 0)
    }

    // ==================== Export Operations ====================

    pub fn save_export(&self, export: &StoredExport) -> DbResult<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO exports
                 (session_id, qualified_id, recipient, file_name, content_type, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                export.session_id,
                export.qualified_id,
                export.recipient,
                export.file_name,
                export.content_type,
                export.body,
                export.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Qualified ids of every export stored for a session
    pub fn list_export_ids(&self, session_id: &str) -> DbResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT qualified_id FROM exports WHERE session_id = ?1")?;
        let rows = stmt.query_map(params![session_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_export(&self, session_id: &str, qualified_id: &str) -> DbResult<StoredExport> {
        let conn = self.lock();
        conn.query_row(
            "SELECT session_id, qualified_id, recipient, file_name, content_type, body, created_at
             FROM exports WHERE session_id = ?1 AND qualified_id = ?2",
            params![session_id, qualified_id],
            |row| {
                Ok(StoredExport {
                    session_id: row.get(0)?,
                    qualified_id: row.get(1)?,
                    recipient: row.get(2)?,
                    file_name: row.get(3)?,
                    content_type: row.get(4)?,
                    body: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ExportNotFound(qualified_id.to_string()),
            other => DbError::Sqlite(other),
        })
    }
}

/// Remove a session's rows; returns false if the session did not exist
fn purge_session(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
    conn.execute("DELETE FROM exports WHERE session_id = ?1", params![id])?;
    let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

fn query_message(conn: &Connection, session_id: &str, id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        "SELECT id, session_id, sender, text, created_at
         FROM messages WHERE session_id = ?1 AND id = ?2",
        params![session_id, id],
        parse_message_row,
    )
    .optional()
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sender: row.get(2)?,
        text: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: row.get(0)?,
        handle: row.get(1)?,
        strikes: row.get(2)?,
        banned: row.get(3)?,
        banned_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRequest> {
    let status: String = row.get(3)?;
    Ok(ChatRequest {
        id: row.get(0)?,
        from_handle: row.get(1)?,
        to_handle: row.get(2)?,
        status: status.parse().unwrap_or(RequestStatus::Expired),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
