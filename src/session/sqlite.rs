//! SQLite 会话存储
//!
//! 会话整体序列化为 JSON 存一行；单连接由 Mutex 保护，所有操作在 spawn_blocking 中执行，
//! update 在一个事务内完成读-改-写。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::model::{Session, SessionId};
use super::store::{SessionMutation, SessionStore, StoreError};

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteSessionStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend)?;
            }
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS production_sessions (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("task join error: {e}")))?
    }
}

fn write_session(conn: &Connection, session: &Session) -> Result<(), StoreError> {
    let data = serde_json::to_string(session)?;
    conn.execute(
        "INSERT OR REPLACE INTO production_sessions (id, topic, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id,
            session.topic,
            data,
            session.created_at.to_rfc3339(),
            session.updated_at.to_rfc3339(),
        ],
    )
    .map_err(backend)?;
    Ok(())
}

fn read_session(conn: &Connection, id: &str) -> Result<Option<Session>, StoreError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM production_sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_string();
        self.blocking(move |conn| read_session(conn, &id)).await
    }

    async fn set(&self, session: Session) -> Result<(), StoreError> {
        self.blocking(move |conn| write_session(conn, &session))
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let n = conn
                .execute("DELETE FROM production_sessions WHERE id = ?1", params![id])
                .map_err(backend)?;
            Ok(n > 0)
        })
        .await
    }

    async fn update(&self, id: &str, mutation: SessionMutation) -> Result<Session, StoreError> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let mut session =
                read_session(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            mutation(&mut session);
            session.updated_at = Utc::now();
            write_session(&tx, &session)?;
            tx.commit().map_err(backend)?;
            Ok(session)
        })
        .await
    }

    async fn list_ids(&self) -> Result<Vec<SessionId>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM production_sessions ORDER BY id")
                .map_err(backend)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            Ok(ids)
        })
        .await
    }
}
