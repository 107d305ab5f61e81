use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("qdrant returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// 向量库中的一个文本块
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// 相似度，越大越相近
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 集合不存在则创建，维度不一致则重建
    async fn ensure_collection(&self, dim: usize) -> Result<(), VectorError>;

    async fn upsert(&self, items: Vec<(DocumentChunk, Vec<f32>)>) -> Result<usize, VectorError>;

    /// 集合不存在时返回空结果
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, VectorError>;

    async fn contains_file(&self, file_name: &str) -> Result<bool, VectorError>;

    /// 删除整个集合，不存在不算错误
    async fn drop_collection(&self) -> Result<(), VectorError>;
}

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: String,
        timeout: Duration,
    ) -> Result<Self, VectorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection,
            client,
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value), VectorError> {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let mut req = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok((status, Value::Null));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(VectorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok((status, res.json().await?))
    }

    async fn create_collection(&self, dim: usize) -> Result<(), VectorError> {
        self.call(
            Method::PUT,
            "",
            Some(json!({ "vectors": { "size": dim, "distance": "Cosine" } })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dim: usize) -> Result<(), VectorError> {
        let (status, payload) = self.call(Method::GET, "", None).await?;
        if status == StatusCode::NOT_FOUND {
            info!("创建向量集合 '{}' (dim={})", self.collection, dim);
            return self.create_collection(dim).await;
        }

        let existing = payload["result"]["config"]["params"]["vectors"]["size"]
            .as_u64()
            .map(|v| v as usize);
        match existing {
            Some(size) if size == dim => {
                info!("向量集合 '{}' 已存在 (dim={})", self.collection, size);
                Ok(())
            }
            other => {
                warn!(
                    "向量集合 '{}' 维度不一致: 期望 {}, 实际 {:?}，重建",
                    self.collection, dim, other
                );
                self.drop_collection().await?;
                self.create_collection(dim).await
            }
        }
    }

    async fn upsert(&self, items: Vec<(DocumentChunk, Vec<f32>)>) -> Result<usize, VectorError> {
        let count = items.len();
        if count == 0 {
            return Ok(0);
        }
        let points: Vec<Value> = items
            .into_iter()
            .map(|(chunk, vector)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": { "text": chunk.text, "file_name": chunk.file_name },
                })
            })
            .collect();
        let (status, _) = self
            .call(Method::PUT, "/points?wait=true", Some(json!({ "points": points })))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(VectorError::Status {
                status: status.as_u16(),
                body: format!("collection '{}' not found", self.collection),
            });
        }
        Ok(count)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, VectorError> {
        let (status, payload) = self
            .call(
                Method::POST,
                "/points/search",
                Some(json!({ "vector": vector, "limit": limit, "with_payload": true })),
            )
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }

        let hits = payload["result"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|hit| {
                        let text = hit["payload"]["text"].as_str()?;
                        Some(ScoredChunk {
                            chunk: DocumentChunk {
                                text: text.to_string(),
                                file_name: hit["payload"]["file_name"]
                                    .as_str()
                                    .unwrap_or_default()
                                    .to_string(),
                            },
                            score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    async fn contains_file(&self, file_name: &str) -> Result<bool, VectorError> {
        let body = json!({
            "limit": 1,
            "with_payload": false,
            "filter": { "must": [ { "key": "file_name", "match": { "value": file_name } } ] },
        });
        let (status, payload) = self.call(Method::POST, "/points/scroll", Some(body)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Ok(payload["result"]["points"]
            .as_array()
            .is_some_and(|points| !points.is_empty()))
    }

    async fn drop_collection(&self) -> Result<(), VectorError> {
        self.call(Method::DELETE, "", None).await?;
        info!("向量集合 '{}' 已删除", self.collection);
        Ok(())
    }
}
