//! 测试替身：脚本化的 LLM 与内存向量库，不访问网络。

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::infra::llm::{EmbedTask, GenerateRequest, LlmError, LlmProvider, LlmReply};
use crate::infra::vector::{DocumentChunk, ScoredChunk, VectorError, VectorStore};

const EMBED_DIM: usize = 64;

/// 按顺序返回预设回复；`None` 表示这一次调用失败。
/// 预设用完后回复固定文本 "ok"。
#[derive(Default)]
pub struct FakeLlm {
    replies: Mutex<VecDeque<Option<LlmReply>>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl FakeLlm {
    pub fn new(replies: Vec<Option<LlmReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn text(reply: &str) -> Option<LlmReply> {
        Some(LlmReply {
            function_call: None,
            text: Some(reply.to_string()),
        })
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|r| r.prompt.clone())
    }
}

/// 词袋哈希向量，同词必同维
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h = DefaultHasher::new();
        word.to_lowercase().hash(&mut h);
        v[(h.finish() % EMBED_DIM as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<LlmReply, LlmError> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(LlmError::Malformed("scripted failure".to_string())),
            None => Ok(LlmReply {
                function_call: None,
                text: Some("ok".to_string()),
            }),
        }
    }

    async fn embed(&self, inputs: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(inputs.iter().map(|s| bag_of_words(s)).collect())
    }
}

#[derive(Default)]
pub struct MemoryVectorStore {
    points: Mutex<Vec<(DocumentChunk, Vec<f32>)>>,
    pub dim: Mutex<Option<usize>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, dim: usize) -> Result<(), VectorError> {
        let mut current = self.dim.lock().unwrap();
        if *current != Some(dim) {
            self.points.lock().unwrap().clear();
            *current = Some(dim);
        }
        Ok(())
    }

    async fn upsert(&self, items: Vec<(DocumentChunk, Vec<f32>)>) -> Result<usize, VectorError> {
        let n = items.len();
        self.points.lock().unwrap().extend(items);
        Ok(n)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, VectorError> {
        let points = self.points.lock().unwrap();
        let mut hits: Vec<ScoredChunk> = points
            .iter()
            .map(|(chunk, v)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine(vector, v),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn contains_file(&self, file_name: &str) -> Result<bool, VectorError> {
        Ok(self
            .points
            .lock()
            .unwrap()
            .iter()
            .any(|(c, _)| c.file_name == file_name))
    }

    async fn drop_collection(&self) -> Result<(), VectorError> {
        self.points.lock().unwrap().clear();
        *self.dim.lock().unwrap() = None;
        Ok(())
    }
}
