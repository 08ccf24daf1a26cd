use crate::parser::hash_content;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sub-unit of a large unit, content-addressed for change detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitChunk {
    pub chunk_type: String,
    pub identifier: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
}

impl UnitChunk {
    pub fn new(
        chunk_type: impl Into<String>,
        identifier: impl Into<String>,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let content = content.into();
        let content_hash = hash_content(&content);
        Self {
            chunk_type: chunk_type.into(),
            identifier: identifier.into(),
            content,
            content_hash,
            metadata,
        }
    }

    /// Whether `content` still hashes to this chunk's address
    pub fn is_current(&self, content: &str) -> bool {
        self.content_hash == hash_content(content)
    }
}
