//! 会话层：制作产物的数据模型与按 ID 访问的存储（内存 / SQLite）

pub mod model;
pub mod sqlite;
pub mod store;

pub use model::{
    new_session_id, AudioMix, ContentPlan, ExportKind, ExportResult, GeneratedVisual,
    NarrationSegment, Scene, Session, SessionId, SfxCue, SfxPlan, SubtitleTrack, VisualKind,
};
pub use sqlite::SqliteSessionStore;
pub use store::{MemorySessionStore, SessionMutation, SessionStore, StoreError};
