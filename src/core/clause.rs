//! WHERE 子句构造：把 LLM 给出的过滤参数转换为带引号、大小写不敏感的条件。

use crate::models::query::{FilterSpec, Predicate, WhereClause};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

pub const CASE_INSENSITIVE: &str = "COLLATE NOCASE";

static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

// 字面量先替换成占位符，改写只作用于引号之外
const SLOT_MARK: char = '\u{E000}';
static LITERAL_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x{E000}(\d+)\x{E000}").unwrap());

// = <字面量>，字面量带通配符时改为 LIKE
static EQ_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^!<>])=(\s*)(\x{E000}(\d+)\x{E000})").unwrap());

// 比较运算符前的裸标识符（可含空格，如 Sale Date）
static BARE_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^|\(|\bAND\b|\bOR\b|\bNOT\b)(\s*)([A-Za-z_][A-Za-z0-9_ ]*?)\s*(!=|<>|>=|<=|=|>|<|\bLIKE\b)",
    )
    .unwrap()
});

/// 标识符用双引号包裹，内部双引号转义
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 字面值用单引号包裹，内部单引号转义
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl FilterSpec {
    /// 对象 -> 键值对（保持顺序），字符串 -> 表达式，其它形态不支持
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::Pairs(
                map.iter()
                    .map(|(k, v)| {
                        let literal = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), literal)
                    })
                    .collect(),
            )),
            Value::String(s) => Some(Self::Expression(s.clone())),
            _ => None,
        }
    }
}

/// 空过滤条件返回 None，即不生成 WHERE
pub fn build_where_clause(spec: &FilterSpec) -> Option<WhereClause> {
    match spec {
        FilterSpec::Pairs(pairs) => {
            let mut terms: Vec<Predicate> = pairs
                .iter()
                .map(|(column, raw)| classify_term(column, raw.trim()))
                .collect();
            match terms.len() {
                0 => None,
                1 => terms.pop().map(WhereClause::Typed),
                _ => Some(WhereClause::Typed(Predicate::And(terms))),
            }
        }
        FilterSpec::Expression(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(WhereClause::Raw(rewrite_expression(text)))
        }
    }
}

fn classify_term(column: &str, value: &str) -> Predicate {
    if DATE_PREFIX.is_match(value) {
        Predicate::DateEq {
            column: column.to_string(),
            value: value.to_string(),
        }
    } else if value.contains('%') || value.contains('_') {
        Predicate::Like {
            column: column.to_string(),
            pattern: value.to_string(),
        }
    } else {
        Predicate::Eq {
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

/// 把单引号字面量（含 '' 转义）换成占位符，返回遮蔽后的文本和原字面量
fn mask_literals(text: &str) -> (String, Vec<String>) {
    let mut masked = String::with_capacity(text.len());
    let mut literals = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\'' {
            masked.push(c);
            continue;
        }
        let mut literal = String::from("'");
        while let Some(ch) = chars.next() {
            literal.push(ch);
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    literal.push('\'');
                } else {
                    break;
                }
            }
        }
        masked.push_str(&format!("{}{}{}", SLOT_MARK, literals.len(), SLOT_MARK));
        literals.push(literal);
    }
    (masked, literals)
}

fn literal_at<'a>(literals: &'a [String], caps: &Captures, group: usize) -> Option<&'a String> {
    caps[group].parse::<usize>().ok().and_then(|i| literals.get(i))
}

fn has_wildcard(literal: &str) -> bool {
    literal.contains('%') || literal.contains('_')
}

/// 自由文本表达式：带通配符的等值改为 LIKE，裸标识符加引号并追加 NOCASE。
/// 引号内的内容原样保留。
pub fn rewrite_expression(text: &str) -> String {
    let (masked, literals) = mask_literals(text);
    let liked = EQ_LITERAL.replace_all(&masked, |caps: &Captures| {
        if literal_at(&literals, caps, 4).is_some_and(|l| has_wildcard(l)) {
            format!("{}LIKE{}{}", &caps[1], &caps[2], &caps[3])
        } else {
            caps[0].to_string()
        }
    });

    let quoted = BARE_IDENT.replace_all(&liked, |caps: &Captures| {
        format!(
            "{}{}{} {} {}",
            &caps[1],
            &caps[2],
            quote_ident(caps[3].trim()),
            CASE_INSENSITIVE,
            caps[4].to_ascii_uppercase()
        )
    });

    LITERAL_SLOT
        .replace_all(&quoted, |caps: &Captures| {
            literal_at(&literals, caps, 1).cloned().unwrap_or_default()
        })
        .into_owned()
}

impl Predicate {
    pub fn render(&self) -> String {
        match self {
            // 日期按值比较，不加排序规则
            Predicate::DateEq { column, value } => {
                format!("DATE({}) = {}", quote_ident(column), quote_literal(value))
            }
            Predicate::Like { column, pattern } => format!(
                "{} LIKE {} {}",
                quote_ident(column),
                quote_literal(pattern),
                CASE_INSENSITIVE
            ),
            Predicate::Eq { column, value } => format!(
                "{} = {} {}",
                quote_ident(column),
                quote_literal(value),
                CASE_INSENSITIVE
            ),
            Predicate::And(terms) => terms
                .iter()
                .map(Predicate::render)
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

impl WhereClause {
    pub fn render(&self) -> String {
        match self {
            WhereClause::Typed(p) => p.render(),
            WhereClause::Raw(text) => text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(value: Value) -> Option<String> {
        FilterSpec::from_value(&value)
            .and_then(|spec| build_where_clause(&spec))
            .map(|w| w.render())
    }

    #[test]
    fn mapping_with_date_and_text() {
        let sql = render(json!({"Sale Date": "2025-07-04", "Category": "Electronics"})).unwrap();
        assert_eq!(
            sql,
            "DATE(\"Sale Date\") = '2025-07-04' AND \"Category\" = 'Electronics' COLLATE NOCASE"
        );
    }

    #[test]
    fn mapping_order_follows_input() {
        let sql = render(json!({"Category": "Electronics", "Sale Date": "2025-07-04"})).unwrap();
        assert!(sql.starts_with("\"Category\" = 'Electronics' COLLATE NOCASE AND DATE("));
    }

    #[test]
    fn date_terms_never_get_collation() {
        for value in ["2025-07-04", " 2024-12-31 ", "2025-07-04 10:30:00"] {
            let sql = render(json!({ "Sale Date": value })).unwrap();
            assert!(sql.starts_with("DATE(\"Sale Date\") = '"), "{}", sql);
            assert!(!sql.contains("COLLATE"), "{}", sql);
        }
    }

    #[test]
    fn wildcards_use_like() {
        for value in ["%-07-04", "2025-07%", "Wire_ess", "%mouse%"] {
            let sql = render(json!({ "Product": value })).unwrap();
            if value.starts_with("2025") {
                // 完整日期前缀优先于通配符判定
                continue;
            }
            assert!(sql.contains(" LIKE "), "{}", sql);
            assert!(!sql.contains(" = "), "{}", sql);
        }
    }

    #[test]
    fn partial_month_pattern_is_like_not_date() {
        let sql = render(json!({"Sale Date": "2025-07%"})).unwrap();
        assert_eq!(sql, "\"Sale Date\" LIKE '2025-07%' COLLATE NOCASE");
    }

    #[test]
    fn non_string_values_are_quoted_too() {
        let sql = render(json!({"Quantity": 2, "Paid": true})).unwrap();
        assert_eq!(
            sql,
            "\"Quantity\" = '2' COLLATE NOCASE AND \"Paid\" = 'true' COLLATE NOCASE"
        );
    }

    #[test]
    fn quotes_are_escaped() {
        let sql = render(json!({"Customer": "O'Brien", "we\"ird": "x"})).unwrap();
        assert_eq!(
            sql,
            "\"Customer\" = 'O''Brien' COLLATE NOCASE AND \"we\"\"ird\" = 'x' COLLATE NOCASE"
        );
    }

    #[test]
    fn expression_is_rewritten() {
        let sql = render(json!("Category = 'Electronics' AND Sale Date = '2025-07%'")).unwrap();
        assert_eq!(
            sql,
            "\"Category\" COLLATE NOCASE = 'Electronics' AND \"Sale Date\" COLLATE NOCASE LIKE '2025-07%'"
        );
    }

    #[test]
    fn literals_are_left_untouched() {
        let sql = render(json!("Note = 'fish and chips = tasty'")).unwrap();
        assert_eq!(sql, "\"Note\" COLLATE NOCASE = 'fish and chips = tasty'");

        let sql = render(json!("Name = 'O''Brien or x = y' AND Code != 'A_1'")).unwrap();
        assert_eq!(
            sql,
            "\"Name\" COLLATE NOCASE = 'O''Brien or x = y' AND \"Code\" COLLATE NOCASE != 'A_1'"
        );
    }

    #[test]
    fn expression_keeps_quoted_and_function_terms() {
        let input = "DATE(\"Sale Date\") = '2025-07-04' AND \"Region\" = 'North'";
        assert_eq!(render(json!(input)).unwrap(), input);
    }

    #[test]
    fn expression_handles_ordering_operators() {
        let sql = render(json!("Quantity >= 3 or Country != 'India'")).unwrap();
        assert_eq!(
            sql,
            "\"Quantity\" COLLATE NOCASE >= 3 or \"Country\" COLLATE NOCASE != 'India'"
        );
    }

    #[test]
    fn empty_and_unsupported_inputs() {
        assert_eq!(render(json!({})), None);
        assert_eq!(render(json!("   ")), None);
        assert_eq!(render(json!(42)), None);
        assert_eq!(render(json!(["a"])), None);
        assert_eq!(render(Value::Null), None);
    }
}
