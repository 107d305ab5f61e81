use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

pub const OP_ORDER_DETAILS: &str = "get_order_details";
pub const OP_POLICY_INFO: &str = "get_policy_info";
pub const OP_UNKNOWN_QUERY: &str = "handle_unknown_query";

/// SQLite 中一张表的实时结构
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// 注册给 LLM 的函数声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// 函数目录：系统提示词 + 静态表元数据 + 函数声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub prompt: String,
    #[serde(default)]
    pub table_metadata: Value,
    pub functions: Vec<FunctionDeclaration>,
}

impl ToolCatalog {
    /// 配置文件存在则覆盖内置目录
    pub fn load_or_builtin(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::builtin())
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool catalog {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid tool catalog {}", path.display()))
    }

    /// 兼容顶层为数组的旧格式：取第一个元素
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Value::Array(items) = &mut value {
            if items.is_empty() {
                anyhow::bail!("tool catalog array is empty");
            }
            value = items.swap_remove(0);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    pub fn builtin() -> Self {
        Self {
            prompt: BUILTIN_PROMPT.to_string(),
            table_metadata: Value::Object(Default::default()),
            functions: vec![
                FunctionDeclaration {
                    name: OP_ORDER_DETAILS.to_string(),
                    description: "Query uploaded tabular data (CSV/Excel sheets stored as SQL tables): \
                                  select columns, filter rows, aggregate and group."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "table_name": { "type": "string", "description": "Table to query; defaults to the last uploaded table." },
                            "columns": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Columns to return; omit for all columns."
                            },
                            "where_clause": {
                                "type": "string",
                                "description": "Boolean filter, e.g. Category = 'Electronics' AND \"Sale Date\" LIKE '2025-07%'."
                            },
                            "aggregations": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "operation": {
                                            "type": "string",
                                            "enum": ["COUNT", "SUM", "AVG", "MIN", "MAX"]
                                        },
                                        "column": { "type": "string" }
                                    },
                                    "required": ["operation", "column"]
                                }
                            },
                            "group_by": { "type": "array", "items": { "type": "string" } },
                            "distinct": { "type": "boolean" }
                        }
                    }),
                },
                FunctionDeclaration {
                    name: OP_POLICY_INFO.to_string(),
                    description: "Answer questions about uploaded documents (policies, manuals, notes) \
                                  using semantic search."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "query": { "type": "string", "description": "The question to search for." }
                        },
                        "required": ["query"]
                    }),
                },
                FunctionDeclaration {
                    name: OP_UNKNOWN_QUERY.to_string(),
                    description: "Use when the request cannot be answered from tables or documents.".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "message": { "type": "string", "description": "Short reply to the user." }
                        }
                    }),
                },
            ],
        }
    }
}

const BUILTIN_PROMPT: &str = "You route user questions to exactly one function. \
Use get_order_details for questions about uploaded tables (orders, sales, rows, totals, counts). \
Use get_policy_info for questions about uploaded documents (policies, manuals, free text). \
Use handle_unknown_query when neither applies. Column and table names must match the metadata exactly.";
