use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub log_dir: PathBuf,
    pub functions_path: PathBuf,
    pub google_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub embed_model: String,
    pub embed_dim: usize,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub qdrant_timeout: Duration,
    pub search_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 变量来源可替换，便于测试
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            bind_addr: parse(&lookup, "BIND_ADDR", "0.0.0.0:8001")?,
            data_db_path: PathBuf::from(text("DATA_DB_PATH", "data.db")),
            upload_dir: PathBuf::from(text("UPLOAD_DIR", "uploads")),
            log_dir: PathBuf::from(text("LOG_DIR", "logs")),
            functions_path: PathBuf::from(text("FUNCTIONS_PATH", "functions.json")),
            google_api_key: text("GOOGLE_API_KEY", ""),
            gemini_base_url: text("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            gemini_model: text("GEMINI_MODEL", "gemini-2.5-flash"),
            embed_model: text("EMBED_MODEL", "gemini-embedding-001"),
            embed_dim: parse(&lookup, "EMBED_DIM", "3072")?,
            qdrant_url: text("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: Some(text("QDRANT_API_KEY", "")).filter(|k| !k.is_empty()),
            qdrant_collection: text("QDRANT_COLLECTION", "documents"),
            qdrant_timeout: Duration::from_secs(parse(&lookup, "QDRANT_TIMEOUT_SECS", "10")?),
            search_limit: parse(&lookup, "SEARCH_LIMIT", "5")?,
        })
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .with_context(|| format!("invalid value for {}: {:?}", key, raw))
}
