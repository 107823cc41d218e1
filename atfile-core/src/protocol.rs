use crate::file::WorkspaceFile;
use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

/// Correlates a response with the request that asked for it. Allocated by
/// the requesting side and never reused within a session.
pub type RequestId = u64;

/// Wire envelope for both directions: `{ "id"?, "type", "data"? }`.
///
/// Requests that expect a reply carry an `id` which the host echoes back.
/// Messages without an `id` are notifications (UI → host) or broadcasts
/// (host → UI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn request(id: RequestId, body: T) -> Self {
        Self { id: Some(id), body }
    }

    pub fn broadcast(body: T) -> Self {
        Self { id: None, body }
    }
}

/// A file sent along with a chat message. Content may be omitted, in which
/// case the host reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub filename: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub has_selection: bool,
}

/// Messages the UI surface sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(RequestKind), derive(Hash))]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    SendMessage {
        message: String,
        #[serde(default)]
        attached_files: Vec<AttachedFile>,
    },
    GetCurrentFile,
    GetFileContent {
        filename: String,
    },
    GetWorkspaceFiles,
    GetFilteredFiles {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    SelectFile {
        file_path: String,
    },
    ApplyToFile {
        filename: String,
        content: String,
    },
    ReloadIgnoreRules,
}

/// Messages the host sends to the UI surface, as replies or broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(ResponseKind), derive(Hash))]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Response {
    AiResponse {
        message: String,
    },
    Error {
        message: String,
    },
    CurrentFileContent {
        filename: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        is_selection: bool,
    },
    FileContent {
        filename: String,
        /// Absent when the file does not exist in the workspace.
        content: Option<String>,
    },
    WorkspaceFiles {
        files: Vec<WorkspaceFile>,
    },
    FilteredFiles {
        files: Vec<WorkspaceFile>,
    },
    CurrentFileInfo {
        file_info: Option<FileInfo>,
    },
    FileApplied {
        filename: String,
        path: WorkspaceFile,
        created: bool,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ResponseKind {
        ResponseKind::from(self)
    }
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        RequestKind::from(self)
    }
}
