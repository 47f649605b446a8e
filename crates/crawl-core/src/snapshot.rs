use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File name marker of the primary dataset for a source.
pub const PRIMARY_FILE_MARKER: &str = "contents";

/// One exported data file as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDescriptor {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<f64>,
    #[serde(default)]
    pub record_count: Option<u64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Listing envelope returned by the files endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileListing {
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// Preview payload for a single file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileContent {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub total: u64,
}

impl FileContent {
    /// Flattens the preview payload into rows: arrays as-is, a single object as one row.
    pub fn into_items(self) -> Vec<Value> {
        match self.data {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

/// Most recent preview of one data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataSnapshot {
    pub source: String,
    pub items: Vec<Value>,
    pub total: u64,
    #[serde(default)]
    pub file: Option<String>,
}

impl DataSnapshot {
    /// Snapshot for a source that currently has no exported files.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            items: Vec::new(),
            total: 0,
            file: None,
        }
    }

    pub fn from_content(
        source: impl Into<String>,
        file: &FileDescriptor,
        content: FileContent,
        preview_limit: usize,
    ) -> Self {
        let total = content.total;
        let mut items = content.into_items();
        items.truncate(preview_limit);
        let total = total.max(items.len() as u64);
        Self {
            source: source.into(),
            items,
            total,
            file: Some(file.path.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Picks the file to preview: the primary dataset when present, otherwise the first listed.
pub fn select_preview_file(files: &[FileDescriptor]) -> Option<&FileDescriptor> {
    files
        .iter()
        .find(|file| file.name.contains(PRIMARY_FILE_MARKER))
        .or_else(|| files.first())
}
