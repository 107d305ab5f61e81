use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// SQLite 行 -> JSON 对象，列顺序与列名保持数据库返回的原样。
/// 表达式列 (如 SUM(...)) 没有声明类型，因此按值的实际存储类型解码。
pub fn sqlite_row_to_json(row: &SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();

    for col in row.columns() {
        let idx = col.ordinal();
        let name = col.name();

        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => None,
            Ok(raw) => Some(raw.type_info().name().to_string()),
            Err(_) => None,
        };

        let val = match storage.as_deref() {
            None => Value::Null,
            Some("INTEGER") | Some("BOOLEAN") => json!(row.try_get::<i64, _>(idx).ok()),
            Some("REAL") | Some("NUMERIC") => json!(row.try_get::<f64, _>(idx).ok()),
            Some("BLOB") => {
                let v: Option<Vec<u8>> = row.try_get(idx).ok();
                json!(v.map(|b| String::from_utf8_lossy(&b).into_owned()))
            }
            _ => json!(row.try_get::<String, _>(idx).ok()),
        };

        map.insert(name.to_string(), val);
    }

    map
}
