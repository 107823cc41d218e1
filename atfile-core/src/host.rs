//! The privileged side of the panel protocol.
//!
//! The host owns the workspace, the active editor state and the chat backend.
//! Each request is served in its own task so a slow model call never holds up
//! a file read; replies carry the request id and may arrive in any order.

use crate::{
    backend::ChatBackend,
    editor::ActiveEditor,
    file::{FileError, Workspace},
    protocol::{AttachedFile, Envelope, Request, RequestId, Response},
    settings::SettingsManager,
    suggest,
};
use anyhow::Result;
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const NO_ACTIVE_FILE: &str = "No active file found. Please open a file in the editor.";

#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Request(Envelope<Request>),
    /// The embedding editor changed focus or selection.
    EditorChanged(Option<ActiveEditor>),
}

#[derive(Clone)]
pub struct HostHandle {
    pub tx: mpsc::UnboundedSender<HostMessage>,
}

impl HostHandle {
    pub fn request(&self, envelope: Envelope<Request>) -> Result<()> {
        self.tx.send(HostMessage::Request(envelope))?;
        Ok(())
    }

    pub fn editor_changed(&self, editor: Option<ActiveEditor>) -> Result<()> {
        self.tx.send(HostMessage::EditorChanged(editor))?;
        Ok(())
    }

    /// Feeds every envelope from `outbound` to the host until either side
    /// goes away.
    pub async fn forward(self, mut outbound: mpsc::UnboundedReceiver<Envelope<Request>>) {
        while let Some(envelope) = outbound.recv().await {
            if self.request(envelope).is_err() {
                debug!("Host stopped, no longer forwarding requests");
                break;
            }
        }
    }
}

/// Sends replies and broadcasts towards the UI surface.
#[derive(Clone)]
pub struct ResponseSender {
    tx: mpsc::UnboundedSender<Envelope<Response>>,
}

impl ResponseSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope<Response>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Replies to request `id`; a request sent without an id gets its answer
    /// as a broadcast.
    pub fn reply(&self, id: Option<RequestId>, response: Response) {
        let _ = self.tx.send(Envelope { id, body: response });
    }

    pub fn broadcast(&self, response: Response) {
        let _ = self.tx.send(Envelope::broadcast(response));
    }
}

pub struct Host;

impl Host {
    /// Launch the host and return a handle to it together with the stream
    /// of outgoing envelopes.
    pub fn launch(
        workspace: Workspace,
        backend: Arc<dyn ChatBackend>,
        settings: SettingsManager,
    ) -> (HostHandle, mpsc::UnboundedReceiver<Envelope<Response>>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (responses, response_rx) = ResponseSender::new();

        let state = HostState {
            workspace,
            backend,
            settings,
            editor: Arc::new(Mutex::new(None)),
            responses,
        };

        tokio::spawn(async move {
            info!(
                root = %state.workspace.root().display(),
                backend = state.backend.name(),
                "Host started"
            );
            while let Some(message) = rx.recv().await {
                match message {
                    HostMessage::Request(envelope) => {
                        let state = state.clone();
                        tokio::spawn(async move { state.handle(envelope).await });
                    }
                    HostMessage::EditorChanged(editor) => state.editor_changed(editor),
                }
            }
            info!("Host stopped");
        });

        (HostHandle { tx }, response_rx)
    }
}

#[derive(Clone)]
struct HostState {
    workspace: Workspace,
    backend: Arc<dyn ChatBackend>,
    settings: SettingsManager,
    editor: Arc<Mutex<Option<ActiveEditor>>>,
    responses: ResponseSender,
}

impl HostState {
    async fn handle(&self, envelope: Envelope<Request>) {
        let Envelope { id, body } = envelope;
        debug!(?id, kind = ?body.kind(), "Handling request");

        let response = match body {
            Request::SendMessage {
                message,
                attached_files,
            } => self.send_message(message, attached_files).await,
            Request::GetCurrentFile => self.current_file(),
            Request::GetFileContent { filename } => self.file_content(filename).await,
            Request::GetWorkspaceFiles => self.workspace_files().await,
            Request::GetFilteredFiles { query, limit } => {
                let limit = limit.unwrap_or(self.settings.settings().suggestions.limit);
                let files = self.workspace.list_files(usize::MAX).await;
                Response::FilteredFiles {
                    files: suggest::rank(&files, &query, limit),
                }
            }
            Request::SelectFile { file_path } => self.select_file(file_path).await,
            Request::ApplyToFile { filename, content } => {
                self.apply_to_file(filename, content).await
            }
            Request::ReloadIgnoreRules => {
                self.workspace.reload();
                self.workspace_files().await
            }
        };

        self.responses.reply(id, response);
    }

    fn editor_changed(&self, editor: Option<ActiveEditor>) {
        let file_info = editor.as_ref().map(ActiveEditor::file_info);
        *self.editor.lock().unwrap() = editor;
        self.responses
            .broadcast(Response::CurrentFileInfo { file_info });
    }

    async fn workspace_files(&self) -> Response {
        let max_results = self.settings.settings().file.max_results;
        Response::WorkspaceFiles {
            files: self.workspace.list_files(max_results).await,
        }
    }

    async fn send_message(&self, message: String, attached_files: Vec<AttachedFile>) -> Response {
        let mut files = Vec::with_capacity(attached_files.len());
        for attached in attached_files {
            let content = match attached.content {
                Some(content) => content,
                None => match self.workspace.read_file(&attached.filename).await {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(filename = %attached.filename, %e, "Skipping attachment");
                        continue;
                    }
                },
            };
            if content.is_empty() {
                continue;
            }
            files.push((attached.filename, content));
        }

        let prompt = compose_prompt(&message, &files);
        match self.backend.complete(prompt).await {
            Ok(reply) => Response::AiResponse { message: reply },
            Err(e) => {
                warn!(backend = self.backend.name(), "Backend failed: {e:#}");
                Response::error(format!("Failed to get AI response: {e:#}"))
            }
        }
    }

    fn current_file(&self) -> Response {
        let editor = self.editor.lock().unwrap();
        let Some(editor) = editor.as_ref() else {
            return Response::error(NO_ACTIVE_FILE);
        };
        let (content, is_selection) = editor.visible_content();
        Response::CurrentFileContent {
            filename: editor.filename().to_string(),
            content: content.to_string(),
            language: editor.file_info().language,
            is_selection,
        }
    }

    async fn file_content(&self, filename: String) -> Response {
        match self.workspace.read_file(&filename).await {
            Ok(content) => Response::FileContent {
                filename,
                content: Some(content),
            },
            Err(FileError::NotFound(_)) => Response::FileContent {
                filename,
                content: None,
            },
            Err(e) => Response::error(e.to_string()),
        }
    }

    async fn select_file(&self, file_path: String) -> Response {
        let name = match Path::new(&file_path).strip_prefix(self.workspace.root()) {
            Ok(relative) => relative.to_string_lossy().into_owned(),
            Err(_) => file_path.clone(),
        };

        let Some(file) = self.workspace.matches(&name).await.into_iter().next() else {
            return Response::error(format!("Failed to open file {file_path}: not found"));
        };
        let content = match self.workspace.read_file(file.path()).await {
            Ok(content) => content,
            Err(e) => return Response::error(format!("Failed to open file {file_path}: {e}")),
        };

        let editor = ActiveEditor::new(
            self.workspace.root().join(file.path()).to_string_lossy(),
            content,
        );
        let file_info = editor.file_info();
        *self.editor.lock().unwrap() = Some(editor);
        Response::CurrentFileInfo {
            file_info: Some(file_info),
        }
    }

    async fn apply_to_file(&self, filename: String, content: String) -> Response {
        match self.workspace.write_file(&filename, &content).await {
            Ok(outcome) => {
                if outcome.created || outcome.file.path() == ".gitignore" {
                    self.responses.broadcast(self.workspace_files().await);
                }
                Response::FileApplied {
                    filename,
                    path: outcome.file,
                    created: outcome.created,
                }
            }
            Err(e) => Response::error(format!("Failed to apply changes to {filename}: {e}")),
        }
    }
}

/// Formats the outgoing prompt: the message, then every non-empty attachment
/// as a fenced block under an `Attached files` heading.
pub fn compose_prompt(message: &str, files: &[(String, String)]) -> String {
    if files.is_empty() {
        return message.to_string();
    }
    let sections: Vec<String> = files
        .iter()
        .map(|(filename, content)| format!("**File: {filename}**\n```\n{content}\n```"))
        .collect();
    format!("{message}\n\n**Attached files:**\n{}", sections.join("\n\n"))
}
