use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::ax_state::AppState;
use crate::models::schema::TableSchema;

pub const RESET_MESSAGE: &str = "✅ All data has been reset. Please upload a new file.";

/// 清空全部数据：表格库、上传目录、会话，最后删除向量集合
pub async fn reset_data(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let removed = state.store.remove().await.map_err(ApiError::internal)?;
    info!("数据库文件已删除: {}", removed);

    let upload_dir = &state.config.upload_dir;
    match tokio::fs::remove_dir_all(upload_dir).await {
        Ok(()) => info!("上传目录已清空: {}", upload_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ApiError::internal(e)),
    }

    state.sessions.reset_all();

    state.documents.reset().await.map_err(|e| {
        warn!("删除向量集合失败: {}", e);
        ApiError::internal(e)
    })?;

    Ok(Json(json!({ "message": RESET_MESSAGE })))
}

pub async fn list_tables(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TableSchema>>, ApiError> {
    let tables = state
        .store
        .describe_tables()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(tables))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
