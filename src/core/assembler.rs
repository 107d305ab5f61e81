use crate::core::clause::{quote_ident, CASE_INSENSITIVE};
use crate::infra::store::{QueryOutcome, StoreError, TabularStore};
use crate::models::query::{Aggregation, AggregateOp, Projection, SelectQuery, WhereClause};
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

static AGG_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(COUNT|SUM|AVG|MIN|MAX)\s*\((.+)\)\s*$").unwrap()
});

/// 列名加引号；已是 FUNC(col) 形式的只给内部列加引号
pub fn quote_column(col: &str) -> String {
    if let Some(caps) = AGG_CALL.captures(col) {
        let func = caps[1].to_ascii_uppercase();
        return format!("{}({})", func, quote_if_bare(caps[2].trim()));
    }
    quote_if_bare(col.trim())
}

fn quote_if_bare(col: &str) -> String {
    if col == "*" || (col.len() >= 2 && col.starts_with('"') && col.ends_with('"')) {
        col.to_string()
    } else {
        quote_ident(col)
    }
}

fn render_aggregation(agg: &Aggregation) -> String {
    let column = agg.column.trim();
    if agg.operation == AggregateOp::Count && column == "*" {
        return "COUNT(*)".to_string();
    }
    format!("{}({})", agg.operation, quote_ident(column))
}

impl SelectQuery {
    /// 聚合优先：给了聚合就忽略普通列；两者都没有则选择全部列
    pub fn new(
        table: impl Into<String>,
        columns: Vec<String>,
        filter: Option<WhereClause>,
        aggregations: Vec<Aggregation>,
        group_by: Vec<String>,
        distinct: bool,
    ) -> Self {
        let projection = if !aggregations.is_empty() {
            Projection::Aggregates(aggregations)
        } else {
            let columns: Vec<String> = columns
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect();
            if columns.is_empty() {
                Projection::All
            } else {
                Projection::Columns(columns)
            }
        };
        Self {
            table: table.into(),
            projection,
            filter,
            group_by,
            distinct,
        }
    }

    pub fn select_list(&self) -> String {
        let items = match &self.projection {
            Projection::All => "*".to_string(),
            Projection::Columns(cols) => cols
                .iter()
                .map(|c| quote_column(c))
                .collect::<Vec<_>>()
                .join(", "),
            Projection::Aggregates(aggs) => aggs
                .iter()
                .map(render_aggregation)
                .collect::<Vec<_>>()
                .join(", "),
        };
        if self.distinct {
            format!("DISTINCT {}", items)
        } else {
            items
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_list(), quote_ident(&self.table));

        match &self.filter {
            // 自由文本表达式整体再追加一次 NOCASE；条件树的每一项已自带
            Some(WhereClause::Raw(text)) => {
                sql.push_str(&format!(" WHERE {} {}", text, CASE_INSENSITIVE));
            }
            Some(clause @ WhereClause::Typed(_)) => {
                sql.push_str(&format!(" WHERE {}", clause.render()));
            }
            None => {}
        }

        let group_by: Vec<String> = self
            .group_by
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| quote_ident(c.trim()))
            .collect();
        if !group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }
        sql
    }
}

/// 组装并执行，结果原样返回（不校验表/列是否存在）
pub async fn select_columns(
    store: &TabularStore,
    query: &SelectQuery,
) -> Result<QueryOutcome, StoreError> {
    let sql = query.to_sql();
    info!("最终 SQL: {}", sql);
    store.execute(&sql).await
}
