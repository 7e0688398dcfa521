//! Plain-text extraction from stored document bytes.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::{naming, DomainError, FileType};

static DROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)>")
        .expect("static regex")
});

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|h[1-6]|li|tr|table|section|article|blockquote|pre)\b[^>]*>")
        .expect("static regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

static BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("static regex"));

static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));

const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".csv", ".json", ".yml", ".yaml", ".xml", ".ini", ".py", ".js", ".ts", ".java",
    ".c", ".cpp", ".h", ".php", ".go", ".sh", ".cs", ".kt", ".sql", ".eml", ".rs",
];

/// Strips markup, keeping block boundaries as blank lines.
pub fn html_to_text(html: &str) -> String {
    let text = DROP_RE.replace_all(html, "");
    let text = BLOCK_RE.replace_all(&text, "\n\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = SPACE_RE.replace_all(&text, " ");
    BLANK_RE.replace_all(&text, "\n\n").trim().to_string()
}

fn is_html(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

/// Extracts the text of a stored document so it can be chunked.
pub fn extract_text(name: &str, file_type: FileType, bytes: &[u8]) -> Result<String, DomainError> {
    if file_type == FileType::Pdf || name.to_lowercase().ends_with(".pdf") {
        return pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| DomainError::validation(format!("PDF extraction failed: {e}")));
    }

    if is_html(name) {
        return Ok(html_to_text(&String::from_utf8_lossy(bytes)));
    }

    let ext = naming::extension(name).to_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) || file_type == FileType::Virtual {
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }

    Err(DomainError::validation(format!(
        "Unsupported file type: {}",
        if ext.is_empty() { file_type.as_str() } else { ext.as_str() }
    )))
}
