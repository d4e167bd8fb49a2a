//! SQLite implementation of [`SessionStore`] and [`ChatStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are run automatically
//! on startup via [`SqliteStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.  The database file location is determined at
//! runtime by the `SKIFF_DATABASE_URL` environment variable and is **not**
//! related to the current working directory at runtime.
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so that no
//! `DATABASE_URL` environment variable is needed at compile time.

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{ChatMessage, ChatSession, ChatStore, SessionStore};

/// SQLite-backed session and transcript store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://skiff.db?mode=rwc"`.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(url).await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database.  Used by tests.
    ///
    /// SQLite gives every connection its own `:memory:` database, so the pool
    /// is pinned to a single connection that is never reaped.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn parse_created_at(raw: &str) -> chrono::DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, error = %e, "failed to parse created_at; using now");
        Utc::now()
    })
}

impl SessionStore for SqliteStore {
    async fn create_session(&self, session: ChatSession) -> Result<(), sqlx::Error> {
        let created_at = session.created_at.to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_sessions (id, title, model, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(&session.model)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, sqlx::Error> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, title, model, created_at \
             FROM chat_sessions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, title, model, created_at)| ChatSession {
            id,
            title,
            model,
            created_at: parse_created_at(&created_at),
        }))
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>, sqlx::Error> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, title, model, created_at \
             FROM chat_sessions ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, model, created_at)| ChatSession {
                id,
                title,
                model,
                created_at: parse_created_at(&created_at),
            })
            .collect())
    }

    async fn update_session_model(&self, id: &str, model: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chat_sessions SET model = ?1 WHERE id = ?2")
            .bind(model)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chat_sessions SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── ChatStore ─────────────────────────────────────────────────────────────────

impl ChatStore for SqliteStore {
    async fn append_message(&self, msg: ChatMessage) -> Result<(), sqlx::Error> {
        let created_at = msg.created_at.to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&msg.id)
        .bind(&msg.session_id)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(&msg.status)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, session_id, role, content, status, created_at \
             FROM chat_messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, role, content, status, created_at)| ChatMessage {
                    id,
                    session_id,
                    role,
                    content,
                    status,
                    created_at: parse_created_at(&created_at),
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{ROLE_ASSISTANT, ROLE_USER, STATUS_COMPLETE, STATUS_FAILED};

    use super::*;

    #[tokio::test]
    async fn session_roundtrip() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let session = ChatSession::new(None, "llama3.2:latest".into());
        store.create_session(session.clone()).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.title, "New chat");
        assert_eq!(loaded.model, "llama3.2:latest");

        assert!(store.get_session("no-such-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_title_and_model_update() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let session = ChatSession::new(None, "a".into());
        store.create_session(session.clone()).await.unwrap();

        store.update_session_model(&session.id, "b").await.unwrap();
        store
            .update_session_title(&session.id, "Weather talk")
            .await
            .unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.model, "b");
        assert_eq!(loaded.title, "Weather talk");
    }

    #[tokio::test]
    async fn messages_come_back_in_insert_order() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let session = ChatSession::new(None, "m".into());
        store.create_session(session.clone()).await.unwrap();

        for (role, text, status) in [
            (ROLE_USER, "hi", STATUS_COMPLETE),
            (ROLE_ASSISTANT, "hello", STATUS_COMPLETE),
            (ROLE_USER, "tell me more", STATUS_COMPLETE),
            (ROLE_ASSISTANT, "well", STATUS_FAILED),
        ] {
            store
                .append_message(ChatMessage::new(&session.id, role, text.into(), status))
                .await
                .unwrap();
        }

        let messages = store.list_messages(&session.id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["hi", "hello", "tell me more", "well"]);
        assert_eq!(messages[3].status, STATUS_FAILED);

        assert!(store.list_messages("other").await.unwrap().is_empty());
    }
}
