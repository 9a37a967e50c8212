//! 会话存储
//!
//! 运行在 await_input 处暂停时，把 (场景文本, 上下文, 类别, 已完成步数) 快照写入 SessionStore；
//! 恢复时原子取出（take）并继续，同一会话只能被续跑一次；再次暂停时重新写入；
//! 运行到达终态（结束 / 放弃 / 契约违背）时删除。
//! 编排器只依赖 [`SessionStore`] trait，后端可替换为内存或 SQLite。

#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::classify::Category;
use crate::config::SessionSection;
use crate::core::RunContext;

#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteSessionStore;

/// 暂停中的运行快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub scenario_text: String,
    pub context: RunContext,
    pub category: Category,
    pub steps_done: usize,
    pub saved_at: DateTime<Utc>,
}

impl Session {
    pub fn snapshot(
        session_id: impl Into<String>,
        context: &RunContext,
        category: Category,
        steps_done: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scenario_text: context.scenario_text.clone(),
            context: context.clone(),
            category,
            steps_done,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(String),

    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 会话存储接口；delete 不存在的 id 必须是 Ok(())
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: Session) -> Result<(), SessionError>;

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// 读出并删除；并发调用时至多一方拿到会话
    async fn take(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    async fn delete(&self, session_id: &str) -> Result<(), SessionError>;
}

/// 进程内会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: Session) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn take(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.write().await.remove(session_id))
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// 按 [session] 段创建会话存储
///
/// backend = "sqlite" 且启用 async-sqlite feature 时使用 SQLite；打开失败或 feature 未启用则回退到内存
pub async fn create_session_store(section: &SessionSection) -> Arc<dyn SessionStore> {
    if section.backend.eq_ignore_ascii_case("sqlite") {
        #[cfg(feature = "async-sqlite")]
        {
            let path = section
                .sqlite_path
                .clone()
                .unwrap_or_else(|| std::path::PathBuf::from("synapse_sessions.db"));
            match SqliteSessionStore::open(&path).await {
                Ok(store) => {
                    tracing::info!(path = %path.display(), "using sqlite session store");
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open sqlite session store, falling back to memory");
                }
            }
        }

        #[cfg(not(feature = "async-sqlite"))]
        tracing::warn!("sqlite session store requested but async-sqlite feature not enabled, using memory store");
    }

    tracing::info!("using in-memory session store");
    Arc::new(MemorySessionStore::new())
}
