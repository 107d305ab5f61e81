use crate::core::clause::quote_ident;
use crate::infra::loader::{CellValue, TableData};
use crate::infra::utils::sqlite_row_to_json;
use crate::models::schema::{ColumnInfo, TableSchema};
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type RowSet = Vec<Map<String, Value>>;

pub const NO_DATA_MESSAGE: &str = "Please upload a file first.";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(RowSet),
    /// 数据库文件还不存在（尚未上传任何表格）
    NoData,
}

/// 上传表格所在的 SQLite 文件。每次操作打开一个短连接，用完即关。
pub struct TabularStore {
    path: PathBuf,
}

impl TabularStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写连接，文件不存在时创建
    async fn open_writable(&self) -> Result<SqliteConnection, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        Ok(options.connect().await?)
    }

    /// 查询走只读连接，拼进来的多条语句也无法改动数据
    async fn open_read_only(&self) -> Result<SqliteConnection, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true);
        Ok(options.connect().await?)
    }

    /// 原样执行 SQL 文本。执行错误以 Err 返回，与“没有匹配行”区分开。
    pub async fn execute(&self, sql: &str) -> Result<QueryOutcome, StoreError> {
        if !self.path.exists() {
            info!("数据库文件不存在，跳过执行: {}", self.path.display());
            return Ok(QueryOutcome::NoData);
        }

        let mut conn = self.open_read_only().await?;
        let result = sqlx::query(sql).fetch_all(&mut conn).await;
        let _ = conn.close().await;

        let rows = result.map_err(|e| {
            warn!("SQL 执行失败: {} | sql={}", e, sql);
            e
        })?;
        let data: RowSet = rows.iter().map(sqlite_row_to_json).collect();
        debug!("SQL 执行完成，返回 {} 行", data.len());
        Ok(QueryOutcome::Rows(data))
    }

    /// 列出全部用户表及其列
    pub async fn describe_tables(&self) -> Result<Vec<TableSchema>, StoreError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let mut conn = self.open_read_only().await?;
        let result = Self::read_schema(&mut conn).await;
        let _ = conn.close().await;
        result
    }

    async fn read_schema(conn: &mut SqliteConnection) -> Result<Vec<TableSchema>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(&name)))
                .fetch_all(&mut *conn)
                .await?;
            let columns = rows
                .iter()
                .filter_map(|r| {
                    Some(ColumnInfo {
                        name: r.try_get::<String, _>("name").ok()?,
                        data_type: r.try_get::<String, _>("type").unwrap_or_default(),
                    })
                })
                .collect();
            tables.push(TableSchema { name, columns });
        }
        Ok(tables)
    }

    /// 替换同名表：DROP + CREATE + 批量 INSERT，在一个事务内完成
    pub async fn replace_table(&self, table: &TableData) -> Result<usize, StoreError> {
        let quoted = quote_ident(&table.name);
        let definitions = table
            .columns
            .iter()
            .zip(table.column_types())
            .map(|(name, affinity)| format!("{} {}", quote_ident(name), affinity))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; table.columns.len()].join(", ");
        let column_list = table
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT INTO {} ({}) VALUES ({})", quoted, column_list, placeholders);

        let mut conn = self.open_writable().await?;
        let mut tx = conn.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quoted))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", quoted, definitions))
            .execute(&mut *tx)
            .await?;

        for row in &table.rows {
            let mut query = sqlx::query(&insert);
            for cell in row {
                query = bind_cell(query, cell);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        conn.close().await?;
        info!("表 '{}' 已写入 {} 行", table.name, table.rows.len());
        Ok(table.rows.len())
    }

    /// 删除数据库文件；文件不存在不算错误
    pub async fn remove(&self) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: &'q CellValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        CellValue::Null => query.bind(None::<String>),
        CellValue::Integer(v) => query.bind(*v),
        CellValue::Real(v) => query.bind(*v),
        CellValue::Text(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales_table() -> TableData {
        TableData {
            name: "sales".to_string(),
            columns: vec![
                "Order ID".to_string(),
                "Category".to_string(),
                "Total Price".to_string(),
                "Sale Date".to_string(),
            ],
            rows: vec![
                vec![
                    CellValue::Text("ORD100".into()),
                    CellValue::Text("Electronics".into()),
                    CellValue::Integer(1000),
                    CellValue::Text("2025-07-04 00:00:00".into()),
                ],
                vec![
                    CellValue::Text("ORD101".into()),
                    CellValue::Text("Furniture".into()),
                    CellValue::Real(250.5),
                    CellValue::Text("2025-07-05 00:00:00".into()),
                ],
                vec![
                    CellValue::Text("ORD102".into()),
                    CellValue::Text("electronics".into()),
                    CellValue::Integer(500),
                    CellValue::Null,
                ],
            ],
        }
    }

    #[tokio::test]
    async fn missing_store_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        assert_eq!(store.execute("SELECT 1").await.unwrap(), QueryOutcome::NoData);
        assert!(store.describe_tables().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn rows_keep_descriptor_order_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        assert_eq!(store.replace_table(&sales_table()).await.unwrap(), 3);

        let outcome = store
            .execute("SELECT \"Total Price\", \"Order ID\" FROM \"sales\" WHERE \"Order ID\" = 'ORD100'")
            .await
            .unwrap();
        let QueryOutcome::Rows(rows) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["Total Price", "Order ID"]);
        assert_eq!(rows[0]["Total Price"], json!(1000.0));
    }

    #[tokio::test]
    async fn aggregate_key_is_the_rendered_expression() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        store.replace_table(&sales_table()).await.unwrap();

        let outcome = store
            .execute("SELECT COUNT(\"Order ID\") FROM \"sales\" WHERE \"Category\" = 'ELECTRONICS' COLLATE NOCASE")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![json!({"COUNT(\"Order ID\")": 2})
                .as_object()
                .unwrap()
                .clone()])
        );
    }

    #[tokio::test]
    async fn errors_are_distinct_from_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        store.replace_table(&sales_table()).await.unwrap();

        let empty = store
            .execute("SELECT * FROM \"sales\" WHERE \"Category\" = 'Toys'")
            .await
            .unwrap();
        assert_eq!(empty, QueryOutcome::Rows(vec![]));

        assert!(store.execute("SELECT * FROM \"missing\"").await.is_err());
        assert!(store.execute("SELEC nonsense").await.is_err());
    }

    #[tokio::test]
    async fn query_connection_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        store.replace_table(&sales_table()).await.unwrap();

        assert!(store.execute("DROP TABLE \"sales\"").await.is_err());
        assert!(store
            .execute("SELECT * FROM \"sales\" WHERE \"Category\" = 'x'; DELETE FROM \"sales\"; --")
            .await
            .is_err());

        let QueryOutcome::Rows(rows) = store.execute("SELECT * FROM \"sales\"").await.unwrap() else {
            panic!("store file should exist");
        };
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn replace_and_describe_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::new(dir.path().join("data.db"));
        store.replace_table(&sales_table()).await.unwrap();
        // 再写一次是替换而不是追加
        store.replace_table(&sales_table()).await.unwrap();

        let tables = store.describe_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "sales");
        let cols: Vec<(&str, &str)> = tables[0]
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type.as_str()))
            .collect();
        assert_eq!(
            cols,
            vec![
                ("Order ID", "TEXT"),
                ("Category", "TEXT"),
                ("Total Price", "REAL"),
                ("Sale Date", "TEXT"),
            ]
        );

        let outcome = store.execute("SELECT COUNT(*) AS n FROM \"sales\"").await.unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![json!({"n": 3}).as_object().unwrap().clone()])
        );

        assert!(store.remove().await.unwrap());
        assert!(!store.remove().await.unwrap());
        assert_eq!(store.execute("SELECT 1").await.unwrap(), QueryOutcome::NoData);
    }
}
