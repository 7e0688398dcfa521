use serde::{Deserialize, Serialize};
use std::fmt;

/// Soft-delete flag carried by most rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusEnum {
    #[default]
    #[serde(rename = "1")]
    Valid,
    #[serde(rename = "0")]
    Invalid,
}

/// Lifecycle of a document's parsing run. Stored as `"0"`..`"4"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "0")]
    Unstart,
    #[serde(rename = "1")]
    Running,
    #[serde(rename = "2")]
    Cancel,
    #[serde(rename = "3")]
    Done,
    #[serde(rename = "4")]
    Fail,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstart => "0",
            Self::Running => "1",
            Self::Cancel => "2",
            Self::Done => "3",
            Self::Fail => "4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "0" => Some(Self::Unstart),
            "1" => Some(Self::Running),
            "2" => Some(Self::Cancel),
            "3" => Some(Self::Done),
            "4" => Some(Self::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Chat,
    Embedding,
    Speech2text,
    Image2text,
    Rerank,
    Tts,
}

impl LlmType {
    pub const ALL: [LlmType; 6] = [
        Self::Chat,
        Self::Embedding,
        Self::Rerank,
        Self::Image2text,
        Self::Speech2text,
        Self::Tts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embedding",
            Self::Speech2text => "speech2text",
            Self::Image2text => "image2text",
            Self::Rerank => "rerank",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Doc,
    Visual,
    Aural,
    Virtual,
    Folder,
    #[default]
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Doc => "doc",
            Self::Visual => "visual",
            Self::Aural => "aural",
            Self::Virtual => "virtual",
            Self::Folder => "folder",
            Self::Other => "other",
        }
    }
}

/// Where a file-manager entry's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileSource {
    #[default]
    #[serde(rename = "")]
    Local,
    #[serde(rename = "knowledgebase")]
    Knowledgebase,
    #[serde(rename = "s3")]
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserType {
    Presentation,
    Laws,
    Manual,
    Paper,
    Resume,
    Book,
    Qa,
    Table,
    Naive,
    Picture,
    One,
    Audio,
    Email,
    KnowledgeGraph,
    Tag,
}

impl ParserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Presentation => "presentation",
            Self::Laws => "laws",
            Self::Manual => "manual",
            Self::Paper => "paper",
            Self::Resume => "resume",
            Self::Book => "book",
            Self::Qa => "qa",
            Self::Table => "table",
            Self::Naive => "naive",
            Self::Picture => "picture",
            Self::One => "one",
            Self::Audio => "audio",
            Self::Email => "email",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::Tag => "tag",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_as_digit_strings() {
        assert_eq!(serde_json::to_string(&StatusEnum::Valid).unwrap(), "\"1\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Cancel).unwrap(), "\"2\"");
        assert_eq!(serde_json::to_string(&FileSource::Local).unwrap(), "\"\"");
    }

    #[test]
    fn test_task_status_parse_matches_as_str() {
        for s in ["0", "1", "2", "3", "4"] {
            assert_eq!(TaskStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(TaskStatus::parse("9").is_none());
    }
}
