use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }
}

impl TryFrom<String> for AggregateOp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unsupported aggregation operation: {}", value))
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// 聚合请求，多个聚合按给定顺序输出
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Aggregation {
    pub operation: AggregateOp,
    pub column: String,
}

/// 过滤条件的输入形态
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// 列名 -> 字面值/通配模式，保持输入顺序
    Pairs(Vec<(String, String)>),
    /// 已经是布尔表达式的文本
    Expression(String),
}

/// WHERE 条件树，只在执行边界渲染为 SQL 文本
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    DateEq { column: String, value: String },
    Like { column: String, pattern: String },
    Eq { column: String, value: String },
    And(Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    Typed(Predicate),
    /// 经过改写的自由文本表达式
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
    Aggregates(Vec<Aggregation>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub projection: Projection,
    pub filter: Option<WhereClause>,
    pub group_by: Vec<String>,
    pub distinct: bool,
}
