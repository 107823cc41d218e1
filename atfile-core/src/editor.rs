use crate::protocol::FileInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Byte range of the editor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// The document focused in the host editor, as reported by the embedding
/// extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEditor {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl ActiveEditor {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for(&path).map(str::to_string);
        Self {
            path,
            content: content.into(),
            language,
            selection: None,
        }
    }

    pub fn with_selection(mut self, start: usize, end: usize) -> Self {
        self.selection = Some(Selection { start, end });
        self
    }

    pub fn filename(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.path)
    }

    /// The selected text, if the selection is non-empty and lies on valid
    /// character boundaries.
    pub fn selected_text(&self) -> Option<&str> {
        let selection = self.selection.filter(|s| !s.is_empty())?;
        self.content.get(selection.start..selection.end)
    }

    /// Selected text when there is one, otherwise the whole document.
    pub fn visible_content(&self) -> (&str, bool) {
        match self.selected_text() {
            Some(text) => (text, true),
            None => (&self.content, false),
        }
    }

    pub fn file_info(&self) -> FileInfo {
        FileInfo {
            filename: self.filename().to_string(),
            path: self.path.clone(),
            language: self
                .language
                .clone()
                .or_else(|| language_for(&self.path).map(str::to_string)),
            has_selection: self.selected_text().is_some(),
        }
    }
}

/// Editor language id for a path, by extension.
pub fn language_for(path: &str) -> Option<&'static str> {
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let language = match extension.as_str() {
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "shellscript",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        _ => return None,
    };
    Some(language)
}
