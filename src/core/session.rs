use dashmap::DashMap;

use crate::models::context::{FileKind, SessionContext};

pub const DEFAULT_SESSION: &str = "default";

/// 按会话 ID 保存最近一次上传的信息
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionContext>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前上下文的快照，未知会话返回空上下文
    pub fn snapshot(&self, session_id: &str) -> SessionContext {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// 上传成功后覆盖；文档类上传不改动最近的表名
    pub fn record_upload(&self, session_id: &str, table: Option<String>, kind: FileKind) {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        if table.is_some() {
            entry.last_table = table;
        }
        entry.last_file_type = Some(kind);
    }

    pub fn reset_all(&self) {
        self.sessions.clear();
    }
}
