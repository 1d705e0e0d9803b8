//! Session token storage.
//!
//! Sessions are issued by the identity layer at login and carried by the
//! client in the `token` cookie. The chat core resolves them when a
//! WebSocket handshake or history request arrives.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::params;

use matcha_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Session;

impl Database {
    /// Issue a new session for `user_id`, valid for `ttl_secs` seconds.
    ///
    /// The token is 32 random bytes, hex-encoded.
    pub fn create_session(&self, user_id: UserId, ttl_secs: i64) -> Result<Session> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        let now = Utc::now();
        let session = Session {
            token: hex::encode(bytes),
            user_id,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        };

        self.conn().execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.token,
                session.user_id.to_string(),
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;

        Ok(session)
    }

    /// Resolve a session token to its record, if the token is known.
    ///
    /// Expiry is *not* checked here; callers decide what "now" means so
    /// the check stays testable.
    pub fn find_session(&self, token: &str) -> Result<Option<Session>> {
        let result = self.conn().query_row(
            "SELECT token, user_id, created_at, expires_at
             FROM sessions
             WHERE token = ?1",
            params![token],
            row_to_session,
        );

        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Delete a session (logout). Returns `true` if a row was deleted.
    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }

    /// Remove all sessions that expired before `now`.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let token: String = row.get(0)?;
    let user_id_str: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let expires_str: String = row.get(3)?;

    let user_id = UserId::parse(&user_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at = parse_ts(&created_str, 2)?;
    let expires_at = parse_ts(&expires_str, 3)?;

    Ok(Session {
        token,
        user_id,
        created_at,
        expires_at,
    })
}

fn parse_ts(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}
