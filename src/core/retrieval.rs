use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::infra::llm::{EmbedTask, GenerateRequest, LlmError, LlmProvider};
use crate::infra::vector::{DocumentChunk, VectorError, VectorStore};

pub const NO_DOCUMENTS_MESSAGE: &str = "Please upload a file first";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

/// 文档语义检索：向量化 + 向量库 + 基于上下文的回答
pub struct DocumentIndex {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn VectorStore>,
    search_limit: usize,
}

impl DocumentIndex {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn VectorStore>, search_limit: usize) -> Self {
        Self {
            llm,
            store,
            search_limit,
        }
    }

    pub async fn ensure_ready(&self, dim: usize) -> Result<(), RetrievalError> {
        Ok(self.store.ensure_collection(dim).await?)
    }

    /// 向量化并写入，返回写入的块数
    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    pub async fn index_document(&self, chunks: Vec<String>, file_name: &str) -> Result<usize, RetrievalError> {
        let chunks: Vec<String> = chunks.into_iter().filter(|c| !c.trim().is_empty()).collect();
        if chunks.is_empty() {
            info!("文档 '{}' 没有可索引的文本", file_name);
            return Ok(0);
        }

        let embeddings = self.llm.embed(&chunks, EmbedTask::Document).await?;
        let dim = embeddings.first().map(Vec::len).unwrap_or_default();
        self.store.ensure_collection(dim).await?;

        let items = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, vector)| {
                (
                    DocumentChunk {
                        text,
                        file_name: file_name.to_string(),
                    },
                    vector,
                )
            })
            .collect();
        let count = self.store.upsert(items).await?;
        info!("文档 '{}' 索引完成，共 {} 块", file_name, count);
        Ok(count)
    }

    /// 命中的文本块以空行连接；没有命中返回 None
    pub async fn search_context(&self, query: &str) -> Result<Option<String>, RetrievalError> {
        let mut vectors = self.llm.embed(&[query.to_string()], EmbedTask::Query).await?;
        let Some(vector) = vectors.pop() else {
            return Ok(None);
        };
        let hits = self.store.search(&vector, self.search_limit).await?;
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            hits.iter()
                .map(|h| h.chunk.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        ))
    }

    /// get_policy_info 的实现：只依据检索到的文档内容回答
    pub async fn answer(&self, query: &str) -> Result<String, RetrievalError> {
        let Some(context) = self.search_context(query).await? else {
            return Ok(NO_DOCUMENTS_MESSAGE.to_string());
        };

        let prompt = format!(
            "You are an intelligent assistant. Based on the following document content, \
             answer the question concisely and clearly.\n\n\
             Document Content:\n\"\"\"\n{}\n\"\"\"\n\nQuestion: {}\nAnswer:\n",
            context, query
        );
        let reply = self.llm.generate(GenerateRequest::text(prompt)).await?;
        Ok(reply.text.unwrap_or_default().trim().to_string())
    }

    pub async fn contains_file(&self, file_name: &str) -> Result<bool, RetrievalError> {
        Ok(self.store.contains_file(file_name).await?)
    }

    pub async fn reset(&self) -> Result<(), RetrievalError> {
        Ok(self.store.drop_collection().await?)
    }
}
