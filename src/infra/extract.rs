use crate::infra::loader::IngestError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;

pub fn pdf_text(path: &Path) -> Result<String, IngestError> {
    pdf_extract::extract_text(path).map_err(|e| IngestError::Pdf(e.to_string()))
}

/// docx 是 zip 包，正文在 word/document.xml；段落之间以空格连接
pub fn docx_text(path: &Path) -> Result<String, IngestError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| IngestError::Docx(e.to_string()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| IngestError::Docx(e.to_string()))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    document_xml_text(&xml)
}

/// 只取 <w:p> 内 <w:t> 的文本，实体引用（含数字引用）由 quick-xml 解码
pub fn document_xml_text(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| IngestError::Docx(format!("bad document.xml: {}", e)))?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => current = Some(String::new()),
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"w:p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                b"w:t" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| IngestError::Docx(format!("bad text run: {}", e)))?;
                if let Some(p) = current.as_mut() {
                    p.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join(" "))
}

/// 按句号切块，去掉空白块
pub fn sentence_chunks(text: &str) -> Vec<String> {
    text.split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
