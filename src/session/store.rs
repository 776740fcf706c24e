//! 会话存储抽象层
//!
//! 编排器在构造时注入 SessionStore，不依赖全局单例。所有访问都按会话 ID 进行；
//! 读-改-写统一走 update，在存储自身的锁内完成。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::model::{Session, SessionId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 对单个会话的原地修改，在存储锁内执行
pub type SessionMutation = Box<dyn FnOnce(&mut Session) + Send>;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// 插入或整体覆盖
    async fn set(&self, session: Session) -> Result<(), StoreError>;

    /// 删除会话；返回是否存在过（清理由调用方负责，流水线从不自动删除）
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// 原子地修改一个已存在的会话并返回修改后的副本；会话不存在时返回 NotFound
    async fn update(&self, id: &str, mutation: SessionMutation) -> Result<Session, StoreError>;

    async fn list_ids(&self) -> Result<Vec<SessionId>, StoreError>;
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn set(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn update(&self, id: &str, mutation: SessionMutation) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        mutation(session);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn list_ids(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemorySessionStore::new();
        store.set(Session::new("prod_a", "rain")).await.unwrap();
        assert_eq!(store.get("prod_a").await.unwrap().unwrap().topic, "rain");
        assert!(store.get("prod_b").await.unwrap().is_none());
        assert!(store.delete("prod_a").await.unwrap());
        assert!(!store.delete("prod_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_session_is_not_found() {
        let store = MemorySessionStore::new();
        let err = store
            .update("prod_missing", Box::new(|s: &mut Session| s.touch("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "prod_missing"));
    }

    #[tokio::test]
    async fn test_update_applies_mutation() {
        let store = MemorySessionStore::new();
        store.set(Session::new("prod_a", "rain")).await.unwrap();
        let updated = store
            .update(
                "prod_a",
                Box::new(|s: &mut Session| {
                    s.transcript = Some("lyrics".into());
                    s.touch("transcribe_audio");
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.transcript.as_deref(), Some("lyrics"));
        assert_eq!(updated.current_step.as_deref(), Some("transcribe_audio"));
        assert_eq!(store.list_ids().await.unwrap(), vec!["prod_a".to_string()]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_by_key() {
        let store = MemorySessionStore::new();
        store.set(Session::new("prod_a", "a")).await.unwrap();
        store.set(Session::new("prod_b", "b")).await.unwrap();
        store
            .update("prod_a", Box::new(|s: &mut Session| s.topic = "changed".into()))
            .await
            .unwrap();
        assert_eq!(store.get("prod_b").await.unwrap().unwrap().topic, "b");
    }
}
