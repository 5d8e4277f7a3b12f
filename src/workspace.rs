//! One-way projection of the latest completed assistant turn into the
//! workspace document store.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sl_base::constants::{WORKSPACE_DIR, WORKSPACE_TITLE_MAX_CHARS};
use sl_base::content::MindMapNode;
use sl_base::shared::truncate_chars;

use crate::persistence::StoreError;

const CURRENT_DOCUMENT_FILE: &str = "current.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Document,
    Mindmap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub agent_id: Option<String>,
    pub agent_name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Receives the current workspace document. Each call overwrites the last.
pub trait WorkspaceSync: Send {
    fn set_content(&mut self, document: WorkspaceDocument) -> Result<(), StoreError>;
}

/// Mind-map root title, else first Markdown heading, else first non-empty line.
pub fn document_title(content: &str, mind_map: Option<&MindMapNode>) -> String {
    if let Some(root) = mind_map {
        return truncate_chars(&root.title, WORKSPACE_TITLE_MAX_CHARS);
    }
    let lines = || content.lines().map(str::trim).filter(|l| !l.is_empty());
    let heading = lines().find(|l| l.starts_with('#')).map(|l| l.trim_start_matches('#').trim());
    let title = heading.filter(|h| !h.is_empty()).or_else(|| lines().next()).unwrap_or("Untitled");
    truncate_chars(title, WORKSPACE_TITLE_MAX_CHARS)
}

/// Writes the current document to `<store_dir>/workspace/current.json`.
#[derive(Debug, Clone)]
pub struct FileWorkspace {
    dir: PathBuf,
}

impl FileWorkspace {
    pub fn new(store_dir: &Path) -> Self {
        Self { dir: store_dir.join(WORKSPACE_DIR) }
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_DOCUMENT_FILE)
    }

    pub fn current(&self) -> Option<WorkspaceDocument> {
        let json = fs::read_to_string(self.current_path()).ok()?;
        serde_json::from_str(&json).ok()
    }
}

impl WorkspaceSync for FileWorkspace {
    fn set_content(&mut self, document: WorkspaceDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(&document).map_err(|e| StoreError::Serialize(e.to_string()))?;
        fs::write(self.current_path(), json)?;
        tracing::debug!(id = %document.id, title = %document.title, "workspace document updated");
        Ok(())
    }
}

/// Discards everything. For running without a workspace.
#[derive(Debug, Default)]
pub struct NoWorkspace;

impl WorkspaceSync for NoWorkspace {
    fn set_content(&mut self, _document: WorkspaceDocument) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> WorkspaceDocument {
        WorkspaceDocument {
            id: id.into(),
            doc_type: DocumentType::Mindmap,
            title: "T".into(),
            content: "# T\n- a".into(),
            metadata: DocumentMetadata { agent_id: Some("w".into()), agent_name: "Writer".into(), timestamp: "now".into() },
        }
    }

    #[test]
    fn title_prefers_mind_map_then_heading_then_first_line() {
        let tree = MindMapNode::with_children("Root", vec![MindMapNode::new("a")]);
        assert_eq!(document_title("# Heading", Some(&tree)), "Root");
        assert_eq!(document_title("intro\n## Act One\nbody", None), "Act One");
        assert_eq!(document_title("\n  first line  \nsecond", None), "first line");
        assert_eq!(document_title("", None), "Untitled");
        let long = "x".repeat(100);
        assert_eq!(document_title(&long, None).chars().count(), WORKSPACE_TITLE_MAX_CHARS + 1);
    }

    #[test]
    fn file_workspace_overwrites_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = FileWorkspace::new(dir.path());
        ws.set_content(doc("A1")).unwrap();
        ws.set_content(doc("A2")).unwrap();
        assert_eq!(ws.current().unwrap().id, "A2");
    }

    #[test]
    fn wire_shape_uses_type_and_camel_case() {
        let v = serde_json::to_value(doc("A1")).unwrap();
        assert_eq!(v["type"], "mindmap");
        assert_eq!(v["metadata"]["agentName"], "Writer");
        assert_eq!(v["metadata"]["agentId"], "w");
    }
}
