use anyhow::{Context, Result};
use common::NormalizedDocument;
use std::path::Path;
use tracing::warn;

/// Documents read from a JSON-lines file
#[derive(Debug, Default)]
pub struct DocumentFile {
    pub documents: Vec<NormalizedDocument>,
    /// Lines that did not parse as a document
    pub skipped: usize,
}

/// Read one `NormalizedDocument` per line. Blank lines are ignored and
/// malformed lines are logged and skipped.
pub fn read_documents(path: &Path) -> Result<DocumentFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut file = DocumentFile::default();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NormalizedDocument>(line) {
            Ok(doc) => file.documents.push(doc.with_content_hash()),
            Err(e) => {
                warn!("Skipping line {} of {}: {}", index + 1, path.display(), e);
                file.skipped += 1;
            }
        }
    }
    Ok(file)
}
