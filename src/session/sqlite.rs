//! SQLite 会话存储（feature `async-sqlite`）
//!
//! 每个会话以 JSON 存为一行，进程重启后暂停中的运行仍可恢复。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{Session, SessionError, SessionStore};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Backend(e.to_string())
    }
}

impl SqliteSessionStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS paused_sessions (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                steps_done INTEGER NOT NULL,
                body TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, session: Session) -> Result<(), SessionError> {
        let body = serde_json::to_string(&session)?;
        sqlx::query(
            "INSERT INTO paused_sessions (id, category, steps_done, body, saved_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                steps_done = excluded.steps_done,
                body = excluded.body,
                saved_at = excluded.saved_at",
        )
        .bind(&session.session_id)
        .bind(session.category.as_str())
        .bind(session.steps_done as i64)
        .bind(&body)
        .bind(session.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query("SELECT body FROM paused_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn take(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("DELETE FROM paused_sessions WHERE id = ? RETURNING body")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM paused_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;
    use crate::core::RunContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        let mut ctx = RunContext::new("spilled curry, customer upset");
        ctx.answers.insert("evidence_images", json!(["a.jpg"]));
        {
            let store = SqliteSessionStore::open(&path).await.unwrap();
            store
                .save(Session::snapshot("s1", &ctx, Category::DamageDispute, 2))
                .await
                .unwrap();
        }

        let store = SqliteSessionStore::open(&path).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.context, ctx);
        assert_eq!(loaded.category, Category::DamageDispute);

        let taken = store.take("s1").await.unwrap().unwrap();
        assert_eq!(taken.steps_done, 2);
        assert!(store.take("s1").await.unwrap().is_none());

        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }
}
