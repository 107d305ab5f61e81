use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::assembler::select_columns;
use crate::core::clause::build_where_clause;
use crate::core::retrieval::DocumentIndex;
use crate::infra::store::{QueryOutcome, RowSet, TabularStore, NO_DATA_MESSAGE};
use crate::models::context::SessionContext;
use crate::models::query::{Aggregation, FilterSpec, SelectQuery};
use crate::models::schema::{OP_ORDER_DETAILS, OP_POLICY_INFO, OP_UNKNOWN_QUERY};

pub const UNKNOWN_QUERY_FALLBACK: &str = "Sorry, I couldn’t understand your request.";

/// LLM 返回参数的三种形态
#[derive(Debug, Clone, PartialEq)]
pub enum RawArgs {
    /// JSON 文本
    Text(String),
    /// protobuf Struct 的 JSON 编码：{"fields": {k: {"stringValue": ...}}}
    Struct(Value),
    /// 普通 JSON 对象
    Native(Map<String, Value>),
}

impl RawArgs {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(map) if is_struct_envelope(&map) => Self::Struct(Value::Object(map)),
            Value::Object(map) => Self::Native(map),
            _ => Self::Native(Map::new()),
        }
    }
}

fn is_struct_envelope(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get("fields").is_some_and(Value::is_object)
}

/// 统一为普通 JSON 对象，递归拆掉 protobuf 包装值
pub fn normalize_args(raw: RawArgs) -> Map<String, Value> {
    let value = match raw {
        RawArgs::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!("参数 JSON 解析失败: {}", e);
                return Map::new();
            }
        },
        RawArgs::Struct(v) => v,
        RawArgs::Native(map) => Value::Object(map),
    };
    match unwrap_value(value) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn unwrap_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_value).collect()),
        Value::Object(mut map) => {
            if map.len() == 1 {
                if let Some(inner) = take_wrapped(&mut map) {
                    return inner;
                }
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, unwrap_value(v))).collect())
        }
        other => other,
    }
}

fn take_wrapped(map: &mut Map<String, Value>) -> Option<Value> {
    let key = map.keys().next()?.clone();
    let inner = map.get(&key)?;
    let accepted = match key.as_str() {
        "stringValue" => inner.is_string(),
        "numberValue" => inner.is_number(),
        "boolValue" => inner.is_boolean(),
        "nullValue" => return Some(Value::Null),
        "fields" | "structValue" => inner.is_object(),
        "listValue" => inner.get("values").is_some_and(Value::is_array) || inner.as_object().is_some_and(Map::is_empty),
        _ => false,
    };
    if !accepted {
        return None;
    }
    let inner = map.remove(&key)?;
    Some(match key.as_str() {
        "listValue" => unwrap_value(inner.get("values").cloned().unwrap_or_else(|| json!([]))),
        _ => unwrap_value(inner),
    })
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderDetailsArgs {
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub where_clause: Option<Value>,
    #[serde(default, rename = "whereClause")]
    pub where_clause_camel: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, deserialize_with = "nullable")]
    pub group_by: Vec<String>,
    #[serde(default, rename = "groupBy", deserialize_with = "nullable")]
    pub group_by_camel: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub distinct: bool,
}

impl OrderDetailsArgs {
    /// 两种拼写都接受，whereClause 优先，null 视为缺省
    pub fn filter(&self) -> Option<&Value> {
        self.where_clause_camel
            .as_ref()
            .or(self.where_clause.as_ref())
            .filter(|v| !v.is_null())
    }

    pub fn take_group_by(&mut self) -> Vec<String> {
        if self.group_by_camel.is_empty() {
            std::mem::take(&mut self.group_by)
        } else {
            std::mem::take(&mut self.group_by_camel)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyInfoArgs {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct UnknownQueryArgs {
    #[serde(default)]
    message: Option<String>,
}

/// 固定的操作注册表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    OrderDetails,
    PolicyInfo,
    UnknownQuery,
}

impl Operation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            OP_ORDER_DETAILS => Some(Self::OrderDetails),
            OP_POLICY_INFO => Some(Self::PolicyInfo),
            OP_UNKNOWN_QUERY => Some(Self::UnknownQuery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Rows(RowSet),
    NoData,
    Text(String),
    Error(String),
}

impl OperationResult {
    /// 交给格式化提示词的原始结果文本
    pub fn to_prompt_text(&self) -> String {
        match self {
            OperationResult::Rows(rows) => {
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            }
            OperationResult::NoData => NO_DATA_MESSAGE.to_string(),
            OperationResult::Text(text) => text.clone(),
            OperationResult::Error(msg) => json!({ "error": msg }).to_string(),
        }
    }
}

pub struct Dispatcher {
    store: Arc<TabularStore>,
    documents: Arc<DocumentIndex>,
}

impl Dispatcher {
    pub fn new(store: Arc<TabularStore>, documents: Arc<DocumentIndex>) -> Self {
        Self { store, documents }
    }

    pub async fn dispatch(
        &self,
        name: &str,
        raw: RawArgs,
        session: &SessionContext,
    ) -> OperationResult {
        let args = normalize_args(raw);
        let args_text = serde_json::to_string(&args).unwrap_or_default();
        info!("分发函数: {} 参数: {}", name, args_text);

        match Operation::from_name(name) {
            Some(Operation::OrderDetails) => self.order_details(args, session).await,
            Some(Operation::PolicyInfo) => self.policy_info(args).await,
            Some(Operation::UnknownQuery) => unknown_query(args),
            None => {
                warn!("未注册的函数: {}", name);
                OperationResult::Error(format!("Unknown function {}", name))
            }
        }
    }

    async fn order_details(&self, args: Map<String, Value>, session: &SessionContext) -> OperationResult {
        let mut parsed: OrderDetailsArgs = match serde_json::from_value(Value::Object(args)) {
            Ok(a) => a,
            Err(e) => {
                return OperationResult::Error(format!("invalid arguments for {}: {}", OP_ORDER_DETAILS, e))
            }
        };

        let table = parsed
            .table_name
            .take()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| session.last_table.clone());
        let Some(table) = table else {
            if !self.store.path().exists() {
                return OperationResult::NoData;
            }
            return OperationResult::Error("no table specified and no table uploaded in this session".to_string());
        };

        let filter = parsed
            .filter()
            .and_then(FilterSpec::from_value)
            .and_then(|spec| build_where_clause(&spec));
        let group_by = parsed.take_group_by();
        let query = SelectQuery::new(
            table,
            parsed.columns,
            filter,
            parsed.aggregations,
            group_by,
            parsed.distinct,
        );

        match select_columns(&self.store, &query).await {
            Ok(QueryOutcome::Rows(rows)) => OperationResult::Rows(rows),
            Ok(QueryOutcome::NoData) => OperationResult::NoData,
            Err(e) => OperationResult::Error(format!("query failed: {}", e)),
        }
    }

    async fn policy_info(&self, args: Map<String, Value>) -> OperationResult {
        let parsed: PolicyInfoArgs = match serde_json::from_value(Value::Object(args)) {
            Ok(a) => a,
            Err(e) => return OperationResult::Error(format!("invalid arguments for {}: {}", OP_POLICY_INFO, e)),
        };
        match self.documents.answer(&parsed.query).await {
            Ok(text) => OperationResult::Text(text),
            Err(e) => {
                warn!("文档检索失败: {}", e);
                OperationResult::Error(format!("document search failed: {}", e))
            }
        }
    }
}

fn unknown_query(args: Map<String, Value>) -> OperationResult {
    let parsed: UnknownQueryArgs = serde_json::from_value(Value::Object(args)).unwrap_or_default();
    OperationResult::Text(
        parsed
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_QUERY_FALLBACK.to_string()),
    )
}
