use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::models::{MessageRow, UserRow};
use crate::{Database, StoreError};

impl Database {
    // -- Users --

    /// Insert a new user. The UNIQUE constraint on `username` is the write-time
    /// uniqueness check; a violation surfaces as `DuplicateUsername`.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64, StoreError> {
        self.with_conn_mut(|conn| {
            let result = conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            );
            match result {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateUsername)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "username = ?1", rusqlite::params![username]))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id = ?1", rusqlite::params![id]))
    }

    pub fn user_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
        })
    }

    // -- Messages --

    /// Append a direct message. Receiver validation and the insert run in one
    /// transaction so a failed validation never leaves a partial write.
    /// The timestamp is assigned here, server-side.
    pub fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let receiver_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [receiver_id],
                |row| row.get(0),
            )?;
            if !receiver_exists {
                return Err(StoreError::ReceiverNotFound);
            }

            let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            tx.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender_id, receiver_id, content, created_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(MessageRow {
                id,
                sender_id,
                receiver_id,
                content: content.to_string(),
                created_at,
            })
        })
    }

    /// Fetch the direct-message history between two users, newest first.
    pub fn conversation(
        &self,
        user_a: i64,
        user_b: i64,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_a, user_b, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn message_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }
}

fn query_user(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<UserRow>, StoreError> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row(params, |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn duplicate_username_rejected_and_store_unchanged() {
        let db = db();
        db.create_user("alice", "hash-a").unwrap();

        let err = db.create_user("alice", "hash-b").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername));
        assert_eq!(db.user_count().unwrap(), 1);

        // The surviving row is the original
        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.password, "hash-a");
    }

    #[test]
    fn user_lookup_by_id_and_username() {
        let db = db();
        let id = db.create_user("bob", "hash").unwrap();

        assert_eq!(db.get_user_by_id(id).unwrap().unwrap().username, "bob");
        assert_eq!(db.get_user_by_username("bob").unwrap().unwrap().id, id);
        assert!(db.get_user_by_id(id + 1).unwrap().is_none());
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn message_timestamps_are_non_decreasing() {
        let db = db();
        let a = db.create_user("alice", "h").unwrap();
        let b = db.create_user("bob", "h").unwrap();

        let mut prev = String::new();
        for i in 0..5 {
            let row = db.insert_message(a, b, &format!("msg {}", i)).unwrap();
            assert!(row.created_at >= prev, "timestamp regressed");
            prev = row.created_at;
        }
    }

    #[test]
    fn missing_receiver_creates_no_row() {
        let db = db();
        let a = db.create_user("alice", "h").unwrap();

        let err = db.insert_message(a, 999, "hello?").unwrap_err();
        assert!(matches!(err, StoreError::ReceiverNotFound));
        assert_eq!(db.message_count().unwrap(), 0);
    }

    #[test]
    fn empty_content_creates_no_row() {
        let db = db();
        let a = db.create_user("alice", "h").unwrap();
        let b = db.create_user("bob", "h").unwrap();

        let err = db.insert_message(a, b, "").unwrap_err();
        assert!(matches!(err, StoreError::EmptyContent));
        assert_eq!(db.message_count().unwrap(), 0);
    }

    #[test]
    fn conversation_includes_both_directions() {
        let db = db();
        let a = db.create_user("alice", "h").unwrap();
        let b = db.create_user("bob", "h").unwrap();
        let c = db.create_user("carol", "h").unwrap();

        db.insert_message(a, b, "a to b").unwrap();
        db.insert_message(b, a, "b to a").unwrap();
        db.insert_message(a, c, "a to c").unwrap();

        let history = db.conversation(a, b, 50).unwrap();
        assert_eq!(history.len(), 2);
        // Newest first
        assert_eq!(history[0].content, "b to a");
        assert_eq!(history[1].content, "a to b");
    }
}
