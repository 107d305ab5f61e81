//! 表格文件解析：CSV / Excel -> 内存中的表，写库交给 TabularStore。

use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use chrono::{Datelike, NaiveDateTime, Timelike};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("excel error: {0}")]
    Excel(#[from] calamine::XlsxError),
    #[error("pdf extraction failed: {0}")]
    Pdf(String),
    #[error("docx extraction failed: {0}")]
    Docx(String),
    #[error("{0}")]
    Empty(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    /// 文本单元格按值推断类型，空串视为 NULL
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Real(f),
            _ => Self::Text(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TableData {
    /// 列亲和类型：全整数 INTEGER，全数值 REAL，其余 TEXT
    pub fn column_types(&self) -> Vec<&'static str> {
        (0..self.columns.len())
            .map(|idx| {
                let mut seen = false;
                let mut has_real = false;
                for row in &self.rows {
                    match row.get(idx) {
                        Some(CellValue::Integer(_)) => seen = true,
                        Some(CellValue::Real(_)) => {
                            seen = true;
                            has_real = true;
                        }
                        Some(CellValue::Text(_)) => return "TEXT",
                        Some(CellValue::Null) | None => {}
                    }
                }
                match (seen, has_real) {
                    (false, _) => "TEXT",
                    (true, true) => "REAL",
                    (true, false) => "INTEGER",
                }
            })
            .collect()
    }
}

/// 文件名/工作表名 -> 表名：非单词字符折叠为下划线，去首尾下划线，转小写
pub fn sanitize_table_name(raw: &str) -> String {
    let name = NON_WORD
        .replace_all(raw, "_")
        .trim_matches('_')
        .to_lowercase();
    if name.is_empty() {
        "upload".to_string()
    } else {
        name
    }
}

/// 空表头补 `Unnamed: i`，重名 (大小写不敏感) 追加 `.n`
pub fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = match h.trim() {
                "" => format!("Unnamed: {}", i),
                t => t.to_string(),
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.to_lowercase()) {
                name = format!("{}.{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// 先按 UTF-8 解码，失败则按 ISO-8859-1 逐字节映射
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            warn!("UTF-8 解码失败，改用 ISO-8859-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

pub fn read_csv(path: &Path, table_name: &str) -> Result<TableData, IngestError> {
    let bytes = std::fs::read(path)?;
    parse_csv(&decode_text(&bytes), table_name)
}

pub fn parse_csv(text: &str, table_name: &str) -> Result<TableData, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(IngestError::Empty(format!("CSV for '{}' has no header row", table_name)));
    }
    let columns = normalize_headers(headers);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row: Vec<CellValue> = record.iter().take(columns.len()).map(CellValue::infer).collect();
        row.resize(columns.len(), CellValue::Null);
        rows.push(row);
    }

    Ok(TableData {
        name: table_name.to_string(),
        columns,
        rows,
    })
}

/// Excel 日期统一为 YYYY-MM-DD HH:MM:SS
fn render_datetime(dt: &NaiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellValue::Integer(*f as i64),
        Data::Float(f) => CellValue::Real(*f),
        Data::Bool(b) => CellValue::Integer(i64::from(*b)),
        Data::String(s) => CellValue::infer(s),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) => CellValue::Text(render_datetime(&dt)),
            None => CellValue::Text(cell.to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => {
            warn!("Excel 单元格错误值: {:?}", e);
            CellValue::Null
        }
    }
}

/// 每个工作表一张表，首行为表头，空表跳过
pub fn read_xlsx(path: &Path) -> Result<Vec<TableData>, IngestError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let sheet_names = workbook.sheet_names().to_owned();

    let mut tables = Vec::with_capacity(sheet_names.len());
    for sheet in sheet_names {
        let range = workbook.worksheet_range(&sheet)?;
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            warn!("工作表 '{}' 为空，跳过", sheet);
            continue;
        };
        let columns = normalize_headers(header.iter().map(|c| c.to_string()).collect());
        let data: Vec<Vec<CellValue>> = rows
            .map(|r| {
                let mut row: Vec<CellValue> = r.iter().take(columns.len()).map(excel_cell).collect();
                row.resize(columns.len(), CellValue::Null);
                row
            })
            .collect();

        let name = sanitize_table_name(&sheet);
        info!("解析工作表 '{}' -> 表 '{}' ({} 行)", sheet, name, data.len());
        tables.push(TableData {
            name,
            columns,
            rows: data,
        });
    }

    if tables.is_empty() {
        return Err(IngestError::Empty("workbook has no non-empty sheets".to_string()));
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(sanitize_table_name("Sales Details (2025)"), "sales_details_2025");
        assert_eq!(sanitize_table_name("--Q3 report--"), "q3_report");
        assert_eq!(sanitize_table_name("orders"), "orders");
        assert_eq!(sanitize_table_name("!!!"), "upload");
    }

    #[test]
    fn headers_are_filled_and_deduplicated() {
        let headers = normalize_headers(vec![
            "Name".into(),
            "".into(),
            "name".into(),
            "Name".into(),
        ]);
        assert_eq!(headers, vec!["Name", "Unnamed: 1", "name.1", "Name.2"]);
    }

    #[test]
    fn csv_values_are_typed_per_column() {
        let text = "Order ID,Quantity,Total Price,Sale Date,Note\n\
                    ORD100,2,1000,2025-07-04,\n\
                    ORD101,1,250.5,2025-07-05,gift\n\
                    ORD102,3\n";
        let table = parse_csv(text, "sales").unwrap();
        assert_eq!(table.columns.len(), 5);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][1], CellValue::Integer(2));
        assert_eq!(table.rows[1][2], CellValue::Real(250.5));
        assert_eq!(table.rows[0][4], CellValue::Null);
        // 短行补 NULL
        assert_eq!(table.rows[2][3], CellValue::Null);
        assert_eq!(
            table.column_types(),
            vec!["TEXT", "INTEGER", "REAL", "TEXT", "TEXT"]
        );
    }

    #[test]
    fn latin1_fallback() {
        let bytes = b"City,Count\nS\xe3o Paulo,3\n";
        let text = decode_text(bytes);
        let table = parse_csv(&text, "cities").unwrap();
        assert_eq!(table.rows[0][0], CellValue::Text("S\u{e3}o Paulo".into()));
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let text = decode_text("\u{feff}a,b\n1,2\n".as_bytes());
        let table = parse_csv(&text, "t").unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
    }

    #[test]
    fn excel_dates_render_with_seconds() {
        let dt = chrono::NaiveDate::from_ymd_opt(2025, 7, 4)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        assert_eq!(render_datetime(&dt), "2025-07-04 09:05:00");
    }

    #[test]
    fn excel_numbers_collapse_to_integers() {
        assert_eq!(excel_cell(&Data::Float(1000.0)), CellValue::Integer(1000));
        assert_eq!(excel_cell(&Data::Float(2.5)), CellValue::Real(2.5));
        assert_eq!(excel_cell(&Data::Bool(true)), CellValue::Integer(1));
        assert_eq!(excel_cell(&Data::Empty), CellValue::Null);
    }
}
