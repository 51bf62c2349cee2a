//! 콘텐츠 추출
//!
//! - 텍스트/코드: UTF-8로 그대로 읽기
//! - HTML: scraper로 본문 텍스트 추출 (article > main > body)
//! - PDF: pdf-extract로 페이지별 텍스트 추출

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

// ============================================================================
// File Kind
// ============================================================================

/// 지원하는 파일 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// 텍스트 파일 (마크다운, 코드 등)
    Text,
    Html,
    Pdf,
}

impl FileKind {
    /// 확장자로 파일 종류 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" | "txt" | "rst" | "rs" | "ts" | "tsx" | "js" | "jsx" | "py"
            | "json" | "toml" | "yaml" | "yml" | "css" | "scss" | "go" | "java" | "c" | "cpp"
            | "h" | "hpp" | "sh" | "bash" | "zsh" | "sql" | "xml" | "csv" | "ipynb" => {
                Some(Self::Text)
            }
            "html" | "htm" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// 파일 경로에서 종류 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// 메타데이터용 MIME 타입
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "json" | "ipynb" => "application/json",
        "csv" => "text/csv",
        "xml" => "application/xml",
        _ => "text/plain",
    }
}

// ============================================================================
// Text
// ============================================================================

/// 텍스트 파일 읽기 (UTF-8이 아니면 에러)
pub async fn read_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;

    String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("File is not valid UTF-8"))
}

// ============================================================================
// HTML
// ============================================================================

/// HTML 문서에서 (제목, 본문 텍스트) 추출
pub fn extract_html(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    (extract_title(&document), extract_body(&document))
}

fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = collapse_whitespace(&element.text().collect::<String>());
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }
    None
}

/// 본문 추출 (우선순위: article > main > body)
fn extract_body(document: &Html) -> String {
    let selectors = ["article", "main", "[role=main]", "body"];

    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = element_text(&element);
                if text.len() > 100 || selector_str == "body" {
                    return text;
                }
            }
        }
    }

    String::new()
}

/// 요소의 텍스트 (script/style/noscript 제외)
fn element_text(element: &ElementRef) -> String {
    let mut parts = Vec::new();

    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .map(|name| matches!(name, "script" | "style" | "noscript"))
            .unwrap_or(false);
        if hidden {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static whitespace regex"));
    re.replace_all(text, " ").trim().to_string()
}

// ============================================================================
// PDF
// ============================================================================

/// PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 목록이며 페이지 번호는 1부터 시작합니다.
/// CPU 바운드라서 `spawn_blocking`에서 호출해야 합니다.
pub fn extract_pdf_pages(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .collect())
}

/// PDF 텍스트를 페이지별로 분리 (폼피드 문자 기준)
///
/// 빈 페이지는 번호를 유지한 채 건너뜁니다.
fn split_pdf_pages(text: &str) -> Vec<String> {
    text.split('\x0c').map(|s| s.trim().to_string()).collect::<Vec<_>>()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_extension("md"), Some(FileKind::Text));
        assert_eq!(FileKind::from_extension("rs"), Some(FileKind::Text));
        assert_eq!(FileKind::from_extension("HTM"), Some(FileKind::Html));
        assert_eq!(FileKind::from_extension("PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_extension("exe"), None);
        assert_eq!(FileKind::from_extension("png"), None);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a/readme.MD")), "text/markdown");
        assert_eq!(mime_type(Path::new("paper.pdf")), "application/pdf");
        assert_eq!(mime_type(Path::new("main.rs")), "text/plain");
    }

    #[test]
    fn test_extract_html_prefers_article() {
        let html = format!(
            r#"<html><head><title>Guide</title><style>body {{ color: red }}</style></head>
            <body><nav>Menu</nav><article><p>{}</p><script>var x = 1;</script></article></body></html>"#,
            "Volcanoes erupt when pressure builds. ".repeat(5)
        );
        let (title, text) = extract_html(&html);
        assert_eq!(title.as_deref(), Some("Guide"));
        assert!(text.starts_with("Volcanoes erupt"));
        assert!(!text.contains("Menu"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn test_extract_html_short_body() {
        let (title, text) = extract_html("<html><body><h1>Hi</h1><p>Short   page</p></body></html>");
        assert_eq!(title.as_deref(), Some("Hi"));
        assert_eq!(text, "Hi Short page");
    }

    #[test]
    fn test_split_pdf_pages_keeps_numbering() {
        let pages = split_pdf_pages("Page 1 content\x0c\x0cPage 3 content");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert!(pages[1].is_empty());
        assert_eq!(pages[2], "Page 3 content");
    }

    #[tokio::test]
    async fn test_read_text_rejects_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert!(read_text(&path).await.is_err());
    }
}
