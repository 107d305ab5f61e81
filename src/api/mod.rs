pub mod admin;
pub mod error;
pub mod query;
pub mod upload;

use axum::http::HeaderMap;

use crate::core::session::DEFAULT_SESSION;

pub const SESSION_HEADER: &str = "x-session-id";

/// 请求头缺失或为空时使用默认会话
pub fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}
