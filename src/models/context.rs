use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct QueryForm {
    pub query: String, // 用户提问内容
}

/// 上传文件类型，按扩展名判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Pdf,
    Docx,
}

impl FileKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// 是否进入 SQLite 表格存储 (否则进入向量库)
    pub fn is_tabular(self) -> bool {
        matches!(self, Self::Csv | Self::Xlsx)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// 会话上下文：最近一次上传的表名与文件类型。
/// 查询时以快照形式显式传入路由与分发，不再依赖进程级全局变量。
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContext {
    pub last_table: Option<String>,
    pub last_file_type: Option<FileKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_by_extension() {
        assert_eq!(FileKind::from_file_name("Sales Q3.CSV"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_file_name("book.xlsx"), Some(FileKind::Xlsx));
        assert_eq!(FileKind::from_file_name("policy.pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_file_name("notes.docx"), Some(FileKind::Docx));
        assert_eq!(FileKind::from_file_name("image.png"), None);
        assert_eq!(FileKind::from_file_name("no_extension"), None);
        assert!(FileKind::Csv.is_tabular());
        assert!(!FileKind::Pdf.is_tabular());
    }
}
