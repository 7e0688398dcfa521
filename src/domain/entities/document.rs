use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{new_id, FileSource, FileType, StatusEnum, TaskStatus};
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

pub const IMG_BASE64_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kb_id: String,
    pub parser_id: String,
    #[serde(default)]
    pub parser_config: serde_json::Value,
    #[serde(default)]
    pub source_type: FileSource,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub created_by: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub token_num: i64,
    #[serde(default)]
    pub chunk_num: i64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub progress_msg: String,
    #[serde(default)]
    pub process_begin_at: Option<i64>,
    #[serde(default)]
    pub process_duation: f64,
    #[serde(default = "empty_map")]
    pub meta_fields: serde_json::Value,
    #[serde(default)]
    pub run: TaskStatus,
    #[serde(default)]
    pub status: StatusEnum,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(flatten)]
    pub stamp: Stamp,
}

fn empty_map() -> serde_json::Value {
    serde_json::json!({})
}

impl Document {
    pub fn new(
        kb_id: impl Into<String>,
        name: impl Into<String>,
        file_type: FileType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            kb_id: kb_id.into(),
            parser_id: "naive".to_string(),
            parser_config: serde_json::json!({}),
            source_type: FileSource::Local,
            file_type,
            created_by: created_by.into(),
            name: name.into(),
            location: String::new(),
            size: 0,
            token_num: 0,
            chunk_num: 0,
            progress: 0.0,
            progress_msg: String::new(),
            process_begin_at: None,
            process_duation: 0.0,
            meta_fields: empty_map(),
            run: TaskStatus::Unstart,
            status: StatusEnum::Valid,
            thumbnail: None,
            stamp: Stamp::now(),
        }
    }

    pub fn with_parser(mut self, parser_id: impl Into<String>, config: serde_json::Value) -> Self {
        self.parser_id = parser_id.into();
        self.parser_config = config;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>, size: i64) -> Self {
        self.location = location.into();
        self.size = size;
        self
    }

    /// Thumbnail URL as served to clients: stored names are routed through
    /// the image endpoint, inline base64 images are passed through.
    pub fn thumbnail_url(&self) -> Option<String> {
        let thumb = self.thumbnail.as_deref().filter(|t| !t.is_empty())?;
        if thumb.starts_with(IMG_BASE64_PREFIX) {
            Some(thumb.to_string())
        } else {
            Some(format!("/v1/document/image/{}-{}", self.kb_id, thumb))
        }
    }

    pub fn to_json_with_thumbnail(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "thumbnail".to_string(),
                serde_json::to_value(self.thumbnail_url()).unwrap_or_default(),
            );
        }
        value
    }
}

impl Entity for Document {
    const TABLE: &'static str = "document";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}

/// One indexed piece of a document as kept in the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub doc_id: String,
    pub kb_id: String,
    pub docnm_kwd: String,
    pub content_with_weight: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub tag_kwd: Vec<String>,
    #[serde(default = "default_available")]
    pub available_int: i64,
    #[serde(default)]
    pub pagerank_fea: Option<i64>,
    #[serde(default)]
    pub knowledge_graph_kwd: Option<String>,
    #[serde(default)]
    pub token_num: i64,
}

fn default_available() -> i64 {
    1
}

impl DocumentChunk {
    pub fn new(
        doc: &Document,
        content: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            doc_id: doc.id.clone(),
            kb_id: doc.kb_id.clone(),
            docnm_kwd: doc.name.clone(),
            token_num: crate::domain::naming::num_tokens(&content) as i64,
            content_with_weight: content,
            chunk_index,
            tag_kwd: Vec::new(),
            available_int: 1,
            pagerank_fea: None,
            knowledge_graph_kwd: None,
        }
    }

    pub fn with_pagerank(mut self, pagerank: i64) -> Self {
        self.pagerank_fea = (pagerank > 0).then_some(pagerank);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Splits content into chunks by paragraph boundaries.
///
/// Paragraphs are joined until they exceed `chunk_size`, then a new chunk starts.
/// A paragraph longer than `chunk_size` on its own is cut at char boundaries.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let paragraphs = content
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .flat_map(|p| split_long(p, chunk_size));

    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for paragraph in paragraphs {
        let would_exceed = !current_chunk.is_empty()
            && current_chunk.len() + paragraph.len() + 2 > chunk_size;

        if would_exceed {
            chunks.push(std::mem::take(&mut current_chunk));
        }

        if !current_chunk.is_empty() {
            current_chunk.push_str("\n\n");
        }
        current_chunk.push_str(&paragraph);
    }

    if !current_chunk.is_empty() {
        chunks.push(current_chunk);
    }

    chunks
}

fn split_long(paragraph: &str, chunk_size: usize) -> Vec<String> {
    if paragraph.len() <= chunk_size {
        return vec![paragraph.to_string()];
    }
    let mut parts = Vec::new();
    let mut part = String::new();
    for ch in paragraph.chars() {
        if part.len() + ch.len_utf8() > chunk_size && !part.is_empty() {
            parts.push(std::mem::take(&mut part));
        }
        part.push(ch);
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_content_single_chunk() {
        let content = "Hello world.\n\nThis is a test.";
        let chunks = chunk_content(content, 100);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Hello world.\n\nThis is a test.");
    }

    #[test]
    fn test_chunk_content_multiple_chunks() {
        let content = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_content(content, 30);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], "Second paragraph.");
    }

    #[test]
    fn test_chunk_content_empty() {
        assert!(chunk_content("", 100).is_empty());
        assert!(chunk_content("\n\n  \n\n", 100).is_empty());
    }

    #[test]
    fn test_chunk_content_cuts_oversized_paragraph() {
        let content = "é".repeat(30);
        let chunks = chunk_content(&content, 20);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 20));
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn test_thumbnail_url_rewrites_stored_names() {
        let mut doc = Document::new("kb1", "a.png", FileType::Visual, "u1");
        assert_eq!(doc.thumbnail_url(), None);

        doc.thumbnail = Some("thumb_a.png".into());
        assert_eq!(
            doc.thumbnail_url().as_deref(),
            Some("/v1/document/image/kb1-thumb_a.png")
        );

        let inline = format!("{IMG_BASE64_PREFIX}AAAA");
        doc.thumbnail = Some(inline.clone());
        assert_eq!(doc.thumbnail_url(), Some(inline));
    }

    #[test]
    fn test_document_json_uses_type_key() {
        let doc = Document::new("kb1", "a.pdf", FileType::Pdf, "u1");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "pdf");
        assert_eq!(json["run"], "0");
        assert!(json["create_time"].is_i64());
    }
}
