//! Connection-edge queries.
//!
//! The edge records are owned by the REST request/review flow; the chat
//! core only ever asks one question of them: "is there an accepted edge
//! between these two users right now?". The answer is never cached.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use matcha_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConnectionEdge, EdgeStatus};

impl Database {
    /// Insert or replace the edge from one user to another.
    ///
    /// Used by the request-review collaborator and by tests to seed the
    /// graph; the delivery engine never calls this.
    pub fn upsert_edge(&self, edge: &ConnectionEdge) -> Result<()> {
        self.conn().execute(
            "INSERT INTO connection_edges (id, from_user_id, to_user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (from_user_id, to_user_id)
             DO UPDATE SET status = excluded.status",
            params![
                edge.id.to_string(),
                edge.from_user_id.to_string(),
                edge.to_user_id.to_string(),
                edge.status.as_str(),
                edge.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find an `accepted` edge between `a` and `b`, in either direction.
    ///
    /// Returns `None` when no edge exists or the edge is in any other
    /// state -- pending or rejected edges do not authorize messaging.
    pub fn find_accepted_edge(&self, a: UserId, b: UserId) -> Result<Option<ConnectionEdge>> {
        let result = self.conn().query_row(
            "SELECT id, from_user_id, to_user_id, status, created_at
             FROM connection_edges
             WHERE status = 'accepted'
               AND ((from_user_id = ?1 AND to_user_id = ?2)
                 OR (from_user_id = ?2 AND to_user_id = ?1))",
            params![a.to_string(), b.to_string()],
            row_to_edge,
        );

        match result {
            Ok(edge) => Ok(Some(edge)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }
}

/// Map a `rusqlite::Row` to a [`ConnectionEdge`].
fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionEdge> {
    let id_str: String = row.get(0)?;
    let from_str: String = row.get(1)?;
    let to_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let from_user_id = UserId::parse(&from_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let to_user_id = UserId::parse(&to_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = EdgeStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown edge status: {status_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ConnectionEdge {
        id,
        from_user_id,
        to_user_id,
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_edge, insert_user, open_test_db};

    #[test]
    fn accepted_edge_is_found_in_both_directions() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        insert_edge(&db, a, b, EdgeStatus::Accepted);

        assert!(db.find_accepted_edge(a, b).unwrap().is_some());
        assert!(db.find_accepted_edge(b, a).unwrap().is_some());
    }

    #[test]
    fn pending_edge_does_not_authorize() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        insert_edge(&db, a, b, EdgeStatus::Interested);
        assert!(db.find_accepted_edge(a, b).unwrap().is_none());

        insert_edge(&db, a, b, EdgeStatus::Rejected);
        assert!(db.find_accepted_edge(a, b).unwrap().is_none());
    }

    #[test]
    fn no_edge_means_no_authorization() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        assert!(db.find_accepted_edge(a, b).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_status() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        insert_edge(&db, a, b, EdgeStatus::Interested);
        insert_edge(&db, a, b, EdgeStatus::Accepted);

        let edge = db.find_accepted_edge(a, b).unwrap().unwrap();
        assert_eq!(edge.status, EdgeStatus::Accepted);
    }
}
