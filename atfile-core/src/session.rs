//! The panel side of a chat: everything the UI surface needs between
//! keystrokes and the host.
//!
//! A [`ChatSession`] is an explicitly owned value. It holds the bus to the
//! host, the cached workspace listing used for the `@` dropdown, the
//! attachment store and the transcript. Content fetches run as background
//! tasks bounded by a semaphore; [`ChatSession::settle`] waits for them.

use crate::{
    attachment::{Attachment, AttachmentOrigin, AttachmentStore, TextSync},
    bus::{BusError, MessageBus},
    file::{WorkspaceFile, WriteOutcome},
    host::HostHandle,
    mention::{complete, extract_closed_tokens, find_open_token, Completion, MentionToken},
    protocol::{Envelope, FileInfo, Request, Response, ResponseKind},
    settings::Settings,
    suggest::FileCompleter,
    transcript::ChatMessage,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, Weak},
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The model call failed; the message is the host's report, verbatim.
    #[error("{0}")]
    Upstream(String),
    /// The host answered a non-chat request with an error.
    #[error("{0}")]
    Host(String),
    #[error("nothing to send")]
    EmptyMessage,
}

/// Dropdown contents for the mention being typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestions {
    pub token: MentionToken,
    pub files: Vec<WorkspaceFile>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    bus: MessageBus,
    settings: Settings,
    attachments: Mutex<AttachmentStore>,
    completer: Mutex<FileCompleter>,
    transcript: Mutex<Vec<ChatMessage>>,
    current_file: Mutex<Option<FileInfo>>,
    /// Mentions whose fetch failed; not retried while they stay in the text.
    failed_mentions: Mutex<HashSet<String>>,
    fetch_permits: Arc<Semaphore>,
    fetches: Mutex<JoinSet<()>>,
    transport: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    pub fn new(bus: MessageBus, settings: Settings) -> Self {
        let permits = settings.attachments.max_concurrent_fetches.max(1);
        let completer = FileCompleter::new(settings.suggestions.limit);
        Self {
            inner: Arc::new(SessionInner {
                bus,
                settings,
                attachments: Mutex::new(AttachmentStore::new()),
                completer: Mutex::new(completer),
                transcript: Mutex::new(Vec::new()),
                current_file: Mutex::new(None),
                failed_mentions: Mutex::new(HashSet::new()),
                fetch_permits: Arc::new(Semaphore::new(permits)),
                fetches: Mutex::new(JoinSet::new()),
                transport: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connects a session to a host running in the same process.
    pub fn in_process(
        host: HostHandle,
        host_rx: mpsc::UnboundedReceiver<Envelope<Response>>,
        settings: Settings,
    ) -> Self {
        let (bus, outbound) = MessageBus::channel(settings.bus.bus_config());
        let session = Self::new(bus.clone(), settings);

        let mut transport = session.inner.transport.lock().unwrap();
        transport.push(tokio::spawn(host.forward(outbound)));
        transport.push(tokio::spawn(async move { bus.pump(host_rx).await }));
        drop(transport);

        session
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Subscribes to host broadcasts and fetches the initial listing.
    pub async fn start(&self) -> Result<usize, SessionError> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.on(ResponseKind::WorkspaceFiles, {
            let weak = weak.clone();
            move |response: &Response| {
                if let (Some(inner), Response::WorkspaceFiles { files }) =
                    (Weak::upgrade(&weak), response)
                {
                    inner.completer.lock().unwrap().set_files(files.clone());
                }
            }
        });
        self.inner.bus.on(ResponseKind::CurrentFileInfo, {
            let weak = weak.clone();
            move |response: &Response| {
                if let (Some(inner), Response::CurrentFileInfo { file_info }) =
                    (Weak::upgrade(&weak), response)
                {
                    *inner.current_file.lock().unwrap() = file_info.clone();
                }
            }
        });
        self.inner.bus.on(ResponseKind::Error, move |response: &Response| {
            if let (Some(inner), Response::Error { message }) = (Weak::upgrade(&weak), response)
            {
                inner.push(ChatMessage::error(message.clone()));
            }
        });

        let count = self.refresh_files().await?;
        info!(files = count, "Chat session started");
        Ok(count)
    }

    /// Replaces the cached listing with a fresh one from the host.
    pub async fn refresh_files(&self) -> Result<usize, SessionError> {
        match self.inner.bus.request(Request::GetWorkspaceFiles).await? {
            Response::WorkspaceFiles { files } => Ok(self.inner.set_files(files)),
            other => Err(unexpected("workspaceFiles", other)),
        }
    }

    /// Asks the host to rebuild its ignore rules and re-list the workspace.
    pub async fn reload_ignore_rules(&self) -> Result<usize, SessionError> {
        match self.inner.bus.request(Request::ReloadIgnoreRules).await? {
            Response::WorkspaceFiles { files } => Ok(self.inner.set_files(files)),
            other => Err(unexpected("workspaceFiles", other)),
        }
    }

    pub fn workspace_files(&self) -> Vec<WorkspaceFile> {
        self.inner.completer.lock().unwrap().files().to_vec()
    }

    /// Ranks the host's full listing instead of the cached one.
    pub async fn filtered_files(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WorkspaceFile>, SessionError> {
        let request = Request::GetFilteredFiles {
            query: query.to_string(),
            limit,
        };
        match self.inner.bus.request(request).await? {
            Response::FilteredFiles { files } => Ok(files),
            other => Err(unexpected("filteredFiles", other)),
        }
    }

    /// Dropdown entries for the mention at `cursor`, or `None` when there is
    /// no open mention or nothing matches.
    pub fn suggestions(&self, text: &str, cursor: usize) -> Option<Suggestions> {
        let token = find_open_token(text, cursor)?;
        let files = self.inner.completer.lock().unwrap().filter(&token.raw);
        if files.is_empty() {
            return None;
        }
        Some(Suggestions { token, files })
    }

    /// Accepts `filename` for the open mention: rewrites the text and
    /// attaches the file.
    pub fn confirm_suggestion(
        &self,
        text: &str,
        cursor: usize,
        filename: &str,
    ) -> Option<Completion> {
        let token = find_open_token(text, cursor)?;
        let completion = complete(text, &token, filename);
        self.attach(filename, AttachmentOrigin::Mention);
        Some(completion)
    }

    /// Selects `filename` and starts fetching its content. Returns false if
    /// it was already attached.
    pub fn attach(&self, filename: &str, origin: AttachmentOrigin) -> bool {
        if !self
            .inner
            .attachments
            .lock()
            .unwrap()
            .select(filename, origin)
        {
            return false;
        }
        self.inner.failed_mentions.lock().unwrap().remove(filename);
        self.spawn_fetch(filename.to_string());
        true
    }

    pub fn remove_attachment(&self, filename: &str) -> Option<Attachment> {
        let removed = self.inner.attachments.lock().unwrap().remove(filename)?;
        if let Some(id) = removed.pending_request() {
            self.inner.bus.cancel(id);
        }
        debug!(filename, "Removed attachment");
        Some(removed)
    }

    /// Keeps mention attachments in step with the input text.
    pub fn on_text_changed(&self, text: &str, cursor: usize) -> TextSync {
        let mut sync = self
            .inner
            .attachments
            .lock()
            .unwrap()
            .sync_with_text(text, cursor);

        for removed in &sync.removed {
            if let Some(id) = removed.pending_request() {
                self.inner.bus.cancel(id);
            }
        }

        let retry_blocked: HashSet<String> = {
            let mentioned: HashSet<String> =
                extract_closed_tokens(text).into_iter().map(|t| t.raw).collect();
            let mut failed = self.inner.failed_mentions.lock().unwrap();
            failed.retain(|name| mentioned.contains(name));
            failed.clone()
        };

        let added = std::mem::take(&mut sync.added);
        for filename in added {
            if retry_blocked.contains(&filename) {
                self.inner.attachments.lock().unwrap().remove(&filename);
                continue;
            }
            self.spawn_fetch(filename.clone());
            sync.added.push(filename);
        }
        sync
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.inner.attachments.lock().unwrap().iter().cloned().collect()
    }

    pub fn current_file(&self) -> Option<FileInfo> {
        self.inner.current_file.lock().unwrap().clone()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.inner.transcript.lock().unwrap().clone()
    }

    /// Waits until every content fetch started so far has finished.
    pub async fn settle(&self) {
        loop {
            let mut fetches = std::mem::take(&mut *self.inner.fetches.lock().unwrap());
            if fetches.is_empty() {
                return;
            }
            while let Some(result) = fetches.join_next().await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!(?e, "Attachment fetch task failed");
                    }
                }
            }
        }
    }

    /// Sends `message` with every ready attachment and returns the reply.
    ///
    /// The attachment store is emptied whatever the outcome. Attachments
    /// still loading are dropped. With `attachments.restore_on_send_failure`
    /// the sent attachments come back when no reply is obtained.
    pub async fn send(&self, message: &str) -> Result<String, SessionError> {
        let snapshot = {
            let mut store = self.inner.attachments.lock().unwrap();
            if message.trim().is_empty() && !store.iter().any(Attachment::is_ready) {
                return Err(SessionError::EmptyMessage);
            }
            store.take_for_send()
        };

        for discarded in &snapshot.discarded {
            if let Some(id) = discarded.pending_request() {
                self.inner.bus.cancel(id);
            }
            debug!(filename = %discarded.filename, "Dropping attachment that was not ready");
        }

        let attached_files = snapshot
            .ready
            .iter()
            .map(Attachment::to_attached_file)
            .collect();
        let names = snapshot
            .ready
            .iter()
            .map(|a| a.filename.clone())
            .collect();
        self.inner
            .push(ChatMessage::user(message.to_string(), names));

        let request = Request::SendMessage {
            message: message.to_string(),
            attached_files,
        };
        let result = match self.inner.bus.request(request).await {
            Ok(Response::AiResponse { message }) => Ok(message),
            Ok(Response::Error { message }) => Err(SessionError::Upstream(message)),
            Ok(other) => Err(unexpected("aiResponse", other)),
            Err(e) => Err(SessionError::Bus(e)),
        };

        match result {
            Ok(reply) => {
                self.inner.push(ChatMessage::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                warn!(%e, "Send failed");
                self.inner.push(ChatMessage::error(e.to_string()));
                if self.inner.settings.attachments.restore_on_send_failure {
                    self.inner
                        .attachments
                        .lock()
                        .unwrap()
                        .restore(snapshot.ready);
                }
                Err(e)
            }
        }
    }

    /// Sends the active editor's selection, or the whole file when nothing
    /// is selected.
    pub async fn use_current_file(&self) -> Result<String, SessionError> {
        let (filename, content, is_selection) =
            match self.inner.bus.request(Request::GetCurrentFile).await? {
                Response::CurrentFileContent {
                    filename,
                    content,
                    is_selection,
                    ..
                } => (filename, content, is_selection),
                Response::Error { message } => {
                    self.inner.push(ChatMessage::error(message.clone()));
                    return Err(SessionError::Host(message));
                }
                other => return Err(unexpected("currentFileContent", other)),
            };

        let what = if is_selection { "selection" } else { "file" };
        self.send(&format!("Current {what}: {filename}\n```\n{content}\n```"))
            .await
    }

    /// Makes `file_path` the host's active editor.
    pub async fn select_file(&self, file_path: &str) -> Result<Option<FileInfo>, SessionError> {
        let request = Request::SelectFile {
            file_path: file_path.to_string(),
        };
        match self.inner.bus.request(request).await? {
            Response::CurrentFileInfo { file_info } => {
                *self.inner.current_file.lock().unwrap() = file_info.clone();
                Ok(file_info)
            }
            Response::Error { message } => Err(SessionError::Host(message)),
            other => Err(unexpected("currentFileInfo", other)),
        }
    }

    /// Writes `content` to the workspace file matching `filename`.
    pub async fn apply_to_file(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<WriteOutcome, SessionError> {
        let request = Request::ApplyToFile {
            filename: filename.to_string(),
            content: content.to_string(),
        };
        match self.inner.bus.request(request).await? {
            Response::FileApplied { path, created, .. } => {
                if created {
                    self.inner.push(ChatMessage::system(format!(
                        "No existing file matched {filename}; created {path}"
                    )));
                }
                Ok(WriteOutcome {
                    file: path,
                    created,
                })
            }
            Response::Error { message } => Err(SessionError::Host(message)),
            other => Err(unexpected("fileApplied", other)),
        }
    }

    /// Stops background work and fails anything still waiting on the host.
    pub fn dispose(&self) {
        self.inner.bus.dispose();
        self.inner.fetches.lock().unwrap().abort_all();
        for handle in self.inner.transport.lock().unwrap().drain(..) {
            handle.abort();
        }
        info!("Chat session disposed");
    }

    fn spawn_fetch(&self, filename: String) {
        let inner = self.inner.clone();
        let mut fetches = self.inner.fetches.lock().unwrap();
        while let Some(finished) = fetches.try_join_next() {
            if let Err(e) = finished {
                if !e.is_cancelled() {
                    warn!(?e, "Attachment fetch task failed");
                }
            }
        }
        fetches.spawn(async move { inner.fetch(filename).await });
    }
}

impl SessionInner {
    fn push(&self, message: ChatMessage) {
        self.transcript.lock().unwrap().push(message);
    }

    fn set_files(&self, files: Vec<WorkspaceFile>) -> usize {
        let count = files.len();
        self.completer.lock().unwrap().set_files(files);
        count
    }

    async fn fetch(&self, filename: String) {
        let Ok(_permit) = self.fetch_permits.clone().acquire_owned().await else {
            return;
        };

        // Send and record the id under the store lock so a removal in
        // between cannot leave a dangling request.
        let pending = {
            let mut store = self.attachments.lock().unwrap();
            if !store
                .get(&filename)
                .is_some_and(|a| a.pending_request().is_none() && !a.is_ready())
            {
                debug!(%filename, "Attachment gone before its fetch started");
                return;
            }
            let request = Request::GetFileContent {
                filename: filename.clone(),
            };
            match self.bus.send(request) {
                Ok(pending) => {
                    store.mark_pending(&filename, pending.id());
                    pending
                }
                Err(e) => {
                    store.remove(&filename);
                    drop(store);
                    self.attach_failed(&filename, &e.to_string());
                    return;
                }
            }
        };
        let id = pending.id();

        let failure = match pending.response().await {
            Ok(Response::FileContent {
                content: Some(content),
                ..
            }) => {
                if !self.attachments.lock().unwrap().resolve(id, content) {
                    debug!(%filename, id, "Attachment removed while its content was loading");
                }
                return;
            }
            Ok(Response::FileContent { content: None, .. }) => "file not found".to_string(),
            Ok(Response::Error { message }) => message,
            Ok(other) => unexpected("fileContent", other).to_string(),
            Err(BusError::Cancelled(_)) | Err(BusError::Disposed) => return,
            Err(e) => e.to_string(),
        };

        if self.attachments.lock().unwrap().fail(id).is_some() {
            self.attach_failed(&filename, &failure);
        }
    }

    fn attach_failed(&self, filename: &str, reason: &str) {
        warn!(filename, reason, "Could not attach file");
        self.failed_mentions
            .lock()
            .unwrap()
            .insert(filename.to_string());
        self.push(ChatMessage::error(format!(
            "Could not attach {filename}: {reason}"
        )));
    }
}

fn unexpected(expected: &'static str, got: Response) -> SessionError {
    SessionError::Bus(BusError::Unexpected {
        expected,
        got: got.kind(),
    })
}
