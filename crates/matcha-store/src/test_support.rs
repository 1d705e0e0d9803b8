//! Helpers shared by the unit tests of this crate.

use chrono::Utc;

use matcha_shared::UserId;

use crate::models::{ConnectionEdge, EdgeStatus, User};
use crate::Database;

pub fn open_test_db() -> Database {
    Database::open_in_memory().expect("in-memory database should open")
}

pub fn insert_user(db: &Database, name: &str) -> UserId {
    let user = User {
        id: UserId::new(),
        display_name: name.to_string(),
        avatar_url: None,
        created_at: Utc::now(),
    };
    db.create_user(&user).expect("user insert should succeed");
    user.id
}

pub fn insert_edge(db: &Database, from: UserId, to: UserId, status: EdgeStatus) {
    let edge = ConnectionEdge {
        id: uuid::Uuid::new_v4(),
        from_user_id: from,
        to_user_id: to,
        status,
        created_at: Utc::now(),
    };
    db.upsert_edge(&edge).expect("edge insert should succeed");
}
