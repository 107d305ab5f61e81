use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::schema::FunctionDeclaration;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

/// 一次生成的结果：结构化函数调用和/或文本
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmReply {
    pub function_call: Option<FunctionCall>,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub prompt: String,
    /// 非空时以自动模式注册为可调用工具
    pub tools: Vec<FunctionDeclaration>,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            system_instruction: None,
            prompt: prompt.into(),
            tools: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    Document,
    Query,
}

impl EmbedTask {
    fn as_api(self) -> &'static str {
        match self {
            EmbedTask::Document => "RETRIEVAL_DOCUMENT",
            EmbedTask::Query => "RETRIEVAL_QUERY",
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name, for logs
    fn name(&self) -> &str;

    /// single-turn generation, optionally with callable tools
    async fn generate(&self, request: GenerateRequest) -> Result<LlmReply, LlmError>;

    /// one embedding vector per input, same order
    async fn embed(&self, inputs: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>, LlmError>;
}

#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    model: String,
    embed_model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: String, model: String, embed_model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            embed_model,
            client: Client::new(),
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let res = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let text = res.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                service: "gemini",
                status,
                body: text,
            });
        }
        Ok(res.json().await?)
    }
}

/// 解析 generateContent 响应：取第一个候选，函数调用与文本分别收集
pub fn parse_generate_response(payload: &Value) -> Result<LlmReply, LlmError> {
    let Some(candidate) = payload["candidates"].get(0) else {
        let feedback = payload.get("promptFeedback").cloned().unwrap_or(Value::Null);
        return Err(LlmError::Malformed(format!("no candidates (feedback: {})", feedback)));
    };

    let mut reply = LlmReply::default();
    let mut texts = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if reply.function_call.is_none() {
                if let Some(call) = part.get("functionCall") {
                    let name = call["name"].as_str().unwrap_or_default().to_string();
                    if !name.is_empty() {
                        reply.function_call = Some(FunctionCall {
                            name,
                            args: call.get("args").cloned().unwrap_or_else(|| json!({})),
                        });
                    }
                }
            }
            if let Some(t) = part["text"].as_str() {
                texts.push(t);
            }
        }
    }
    if !texts.is_empty() {
        reply.text = Some(texts.concat());
    }
    Ok(reply)
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<LlmReply, LlmError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(system) = request.system_instruction {
                obj.insert("systemInstruction".to_string(), json!({ "parts": [{ "text": system }] }));
            }
            if !request.tools.is_empty() {
                obj.insert("tools".to_string(), json!([{ "functionDeclarations": request.tools }]));
                obj.insert(
                    "toolConfig".to_string(),
                    json!({ "functionCallingConfig": { "mode": "AUTO" } }),
                );
            }
        }

        let payload = self.post(&url, &body).await?;
        debug!("Gemini 原始响应: {}", payload);
        parse_generate_response(&payload)
    }

    async fn embed(&self, inputs: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/v1beta/models/{}:batchEmbedContents", self.base_url, self.embed_model);
        let model = format!("models/{}", self.embed_model);
        let requests: Vec<Value> = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": model,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": task.as_api(),
                })
            })
            .collect();

        let payload = self.post(&url, &json!({ "requests": requests })).await?;

        let mut embeddings = Vec::with_capacity(inputs.len());
        if let Some(data) = payload["embeddings"].as_array() {
            for item in data {
                if let Some(vals) = item["values"].as_array() {
                    embeddings.push(vals.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect());
                }
            }
        }
        if embeddings.len() != inputs.len() {
            return Err(LlmError::Malformed(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_call_part() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "functionCall": { "name": "get_order_details", "args": { "table_name": "sales" } } }
                ] }
            }]
        });
        let reply = parse_generate_response(&payload).unwrap();
        assert_eq!(
            reply.function_call,
            Some(FunctionCall {
                name: "get_order_details".into(),
                args: json!({ "table_name": "sales" }),
            })
        );
        assert_eq!(reply.text, None);
    }

    #[test]
    fn parses_text_parts() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [ { "text": "Hello " }, { "text": "there" } ] } }]
        });
        let reply = parse_generate_response(&payload).unwrap();
        assert_eq!(reply.function_call, None);
        assert_eq!(reply.text.as_deref(), Some("Hello there"));
    }

    #[test]
    fn call_without_args_gets_empty_object() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [ { "functionCall": { "name": "handle_unknown_query" } } ] } }]
        });
        let call = parse_generate_response(&payload).unwrap().function_call.unwrap();
        assert_eq!(call.args, json!({}));
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let payload = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(parse_generate_response(&payload), Err(LlmError::Malformed(_))));
    }
}
