use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::infra::llm::{FunctionCall, GenerateRequest, LlmProvider, LlmReply};
use crate::models::context::SessionContext;
use crate::models::schema::{TableSchema, ToolCatalog};

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

const ROUTING_RULES: &str = r#"You are an intelligent assistant that answers user questions using both structured and unstructured data.
Decide when to query structured tables and when to use semantic search over uploaded documents. Matching is not case sensitive.

General Rules:
1. Structured data (tables)
   - Use the table metadata below to map the question to the correct table and columns.
   - Dates are stored as `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
     * Full date: filter on the date portion, e.g. {"Sale Date": "2025-07-04"}.
     * Month and day without a year ("July 4th"): "Sale Date" LIKE '%-07-04%'.
     * Year and month ("July 2025"): "Sale Date" LIKE '2025-07%'.
     * Month only ("July"): "Sale Date" LIKE '%-07-%'.
     * Ranges: DATE("Sale Date") BETWEEN 'start' AND 'end'.
     * Never append COLLATE NOCASE to DATE(...) or strftime(...) expressions.
   - Totals, averages, counts, minimums and maximums go into aggregations; grouping goes into group_by.
   - Text columns support filtering and grouping (e.g. Category, Country, Payment Method).
2. Unstructured data (documents, policies, manuals, notes)
   - Use get_policy_info. Do not invent facts that are not in the documents.
3. When both could apply, prefer the structured tables.
4. If nothing applies, call handle_unknown_query with a short helpful message.
5. Never expose raw SQL in the answer."#;

/// 路由结果：结构化调用，或模型直接给出的文字回答
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Call(FunctionCall),
    Answer(String),
}

/// 文本兜底时接受的两种 JSON 形态
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallEnvelope {
    Wrapped { function_call: CallBody },
    Bare(CallBody),
}

#[derive(Debug, Deserialize)]
struct CallBody {
    name: String,
    #[serde(default, alias = "args")]
    arguments: Value,
}

impl CallEnvelope {
    fn into_call(self) -> FunctionCall {
        let body = match self {
            CallEnvelope::Wrapped { function_call } => function_call,
            CallEnvelope::Bare(body) => body,
        };
        FunctionCall {
            name: body.name,
            args: body.arguments,
        }
    }
}

pub struct IntentRouter {
    llm: Arc<dyn LlmProvider>,
    catalog: Arc<ToolCatalog>,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmProvider>, catalog: Arc<ToolCatalog>) -> Self {
        Self { llm, catalog }
    }

    /// None 表示没有识别出任何操作，不是错误
    pub async fn route(
        &self,
        user_query: &str,
        tables: &[TableSchema],
        session: &SessionContext,
    ) -> Option<RoutingDecision> {
        let request = GenerateRequest {
            system_instruction: Some(format!(
                "{}\n{}",
                self.catalog.prompt, self.catalog.table_metadata
            )),
            prompt: self.build_prompt(user_query, tables, session),
            tools: self.catalog.functions.clone(),
        };

        match self.llm.generate(request).await {
            Ok(reply) => {
                let decision = decision_from_reply(reply);
                if let Some(RoutingDecision::Call(call)) = &decision {
                    if !self.catalog.declares(&call.name) {
                        warn!("模型选择了未声明的函数: {}", call.name);
                    }
                }
                decision
            }
            Err(e) => {
                warn!("意图路由调用 {} 失败: {}", self.llm.name(), e);
                None
            }
        }
    }

    fn build_prompt(&self, user_query: &str, tables: &[TableSchema], session: &SessionContext) -> String {
        let mut prompt = format!("{}\n\n{}\n\n", self.catalog.prompt, ROUTING_RULES);

        let has_metadata = self
            .catalog
            .table_metadata
            .as_object()
            .is_some_and(|m| !m.is_empty());
        if has_metadata {
            prompt.push_str("Table descriptions:\n");
            prompt.push_str(&self.catalog.table_metadata.to_string());
            prompt.push_str("\n\n");
        }

        if tables.is_empty() {
            prompt.push_str("No tables have been uploaded yet.\n\n");
        } else {
            prompt.push_str("Here is the table metadata you can use:\n");
            prompt.push_str(&serde_json::to_string(tables).unwrap_or_default());
            prompt.push_str("\n\n");
        }

        if let Some(table) = &session.last_table {
            prompt.push_str(&format!(
                "The most recently uploaded table is \"{}\". Use it when the question does not name a table.\n",
                table
            ));
        }
        if let Some(kind) = session.last_file_type {
            prompt.push_str(&format!("The most recently uploaded file type is {}.\n", kind.as_str()));
        }

        prompt.push_str(&format!("\nUser query: {}", user_query));
        prompt
    }
}

/// 结构化调用优先；否则从文本中取第一个 {...} 按调用格式严格解析
pub fn decision_from_reply(reply: LlmReply) -> Option<RoutingDecision> {
    if let Some(call) = reply.function_call {
        info!("结构化函数调用: {}", call.name);
        return Some(RoutingDecision::Call(call));
    }

    let text = reply.text.unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        warn!("模型既没有函数调用也没有文本");
        return None;
    }

    let Some(found) = JSON_OBJECT.find(text) else {
        info!("模型直接给出文字回答");
        return Some(RoutingDecision::Answer(text.to_string()));
    };

    match serde_json::from_str::<CallEnvelope>(found.as_str()) {
        Ok(envelope) => {
            let call = envelope.into_call();
            if call.name.trim().is_empty() {
                warn!("兜底 JSON 中函数名为空");
                return None;
            }
            info!("兜底解析出函数调用: {}", call.name);
            Some(RoutingDecision::Call(call))
        }
        Err(e) => {
            warn!("兜底 JSON 不符合函数调用格式: {}", e);
            None
        }
    }
}
