use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::api::error::ApiError;
use crate::api::session_id;
use crate::ax_state::AppState;
use crate::infra::extract::{docx_text, pdf_text, sentence_chunks};
use crate::infra::loader::{read_csv, read_xlsx, sanitize_table_name, IngestError, TableData};
use crate::models::context::FileKind;

pub const ALREADY_EXISTS_MESSAGE: &str = "File already exists, no changes made.";
pub const UNSUPPORTED_MESSAGE: &str = "Unsupported file type.";

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let session_id = session_id(&headers);

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((raw_name, bytes)) = upload else {
        return Err(ApiError::BadRequest("missing multipart field 'file'".to_string()));
    };

    let message = ingest_upload(&state, &session_id, &raw_name, &bytes).await?;
    Ok(Json(json!({ "message": message })))
}

/// 只保留最后一段路径，防止写出上传目录
pub fn base_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// 保存并按类型入库，返回给用户的提示
pub async fn ingest_upload(
    state: &AppState,
    session_id: &str,
    raw_name: &str,
    bytes: &[u8],
) -> Result<String, ApiError> {
    let file_name =
        base_file_name(raw_name).ok_or_else(|| ApiError::BadRequest("missing file name".to_string()))?;
    let kind = FileKind::from_file_name(&file_name)
        .ok_or_else(|| ApiError::BadRequest(UNSUPPORTED_MESSAGE.to_string()))?;
    info!("开始处理上传 [{}]: {}", session_id, file_name);

    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(ApiError::internal)?;
    let path = upload_dir.join(&file_name);

    if path.exists() {
        warn!("文件已存在: {}", path.display());
        let table_name = match kind {
            FileKind::Csv => Some(csv_table_name(&file_name)),
            FileKind::Xlsx => {
                let owned_path = path.clone();
                let tables = run_blocking(move || read_xlsx(&owned_path)).await?;
                tables.into_iter().next().map(|t| t.name)
            }
            FileKind::Pdf | FileKind::Docx => {
                reindex_if_missing(state, &path, &file_name, kind).await?;
                None
            }
        };
        // 文件没变，但本会话的最近上传仍指向它
        state.sessions.record_upload(session_id, table_name, kind);
        return Ok(ALREADY_EXISTS_MESSAGE.to_string());
    }

    tokio::fs::write(&path, bytes)
        .await
        .map_err(ApiError::internal)?;
    info!("文件已保存: {}", path.display());

    match process_file(state, session_id, &path, &file_name, kind).await {
        Ok(message) => Ok(message),
        Err(e) => {
            error!("处理上传失败 {}: {}", file_name, e);
            // 删除半成品，下次上传重新处理
            let _ = tokio::fs::remove_file(&path).await;
            Err(e)
        }
    }
}

async fn process_file(
    state: &AppState,
    session_id: &str,
    path: &Path,
    file_name: &str,
    kind: FileKind,
) -> Result<String, ApiError> {
    match kind {
        FileKind::Csv => {
            let table_name = csv_table_name(file_name);
            let owned_path = path.to_path_buf();
            let name = table_name.clone();
            let table = run_blocking(move || read_csv(&owned_path, &name)).await?;
            store_table(state, &table).await?;
            state
                .sessions
                .record_upload(session_id, Some(table_name.clone()), kind);
            Ok(format!("CSV uploaded and indexed in SQLite as '{}'.", table_name))
        }
        FileKind::Xlsx => {
            let owned_path = path.to_path_buf();
            let tables = run_blocking(move || read_xlsx(&owned_path)).await?;
            for table in &tables {
                store_table(state, table).await?;
            }
            let names: Vec<String> = tables.iter().map(|t| format!("'{}'", t.name)).collect();
            state
                .sessions
                .record_upload(session_id, tables.first().map(|t| t.name.clone()), kind);
            Ok(format!(
                "Excel file uploaded. Sheets saved as tables: [{}]",
                names.join(", ")
            ))
        }
        FileKind::Pdf | FileKind::Docx => {
            let chunks = extract_chunks(path.to_path_buf(), kind).await?;
            state
                .documents
                .index_document(chunks, file_name)
                .await
                .map_err(ApiError::internal)?;
            state.sessions.record_upload(session_id, None, kind);
            Ok(match kind {
                FileKind::Pdf => "PDF uploaded and indexed.".to_string(),
                _ => "DOCX uploaded and indexed.".to_string(),
            })
        }
    }
}

fn csv_table_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    sanitize_table_name(stem)
}

async fn store_table(state: &AppState, table: &TableData) -> Result<(), ApiError> {
    let start = Instant::now();
    state
        .store
        .replace_table(table)
        .await
        .map_err(ApiError::internal)?;
    info!("表 '{}' 写入完成，用时 {:.2}s", table.name, start.elapsed().as_secs_f64());
    Ok(())
}

async fn reindex_if_missing(
    state: &AppState,
    path: &Path,
    file_name: &str,
    kind: FileKind,
) -> Result<(), ApiError> {
    let indexed = state
        .documents
        .contains_file(file_name)
        .await
        .map_err(ApiError::internal)?;
    if indexed {
        info!("向量库中已有 '{}'，跳过", file_name);
        return Ok(());
    }
    info!("向量库中没有 '{}'，重新索引", file_name);
    let chunks = extract_chunks(path.to_path_buf(), kind).await?;
    state
        .documents
        .index_document(chunks, file_name)
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

async fn extract_chunks(path: PathBuf, kind: FileKind) -> Result<Vec<String>, ApiError> {
    run_blocking(move || {
        let text = match kind {
            FileKind::Pdf => pdf_text(&path)?,
            FileKind::Docx => docx_text(&path)?,
            other => {
                return Err(IngestError::Empty(format!(
                    "{} files carry no document text",
                    other.as_str()
                )))
            }
        };
        Ok(sentence_chunks(&text))
    })
    .await
}

/// 解析是 CPU 密集的同步代码，放到阻塞线程池
async fn run_blocking<T, F>(job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}
