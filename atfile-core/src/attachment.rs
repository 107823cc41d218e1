use crate::{
    mention::{extract_closed_tokens, find_open_token},
    protocol::{AttachedFile, RequestId},
};
use std::collections::HashSet;
use tracing::debug;

/// Lifecycle of a single attachment.
///
/// `Selected → ContentPending → Ready` on the normal path. A failed fetch
/// removes the entry outright, so there is no stored failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Selected,
    ContentPending(RequestId),
    Ready,
}

/// Where an attachment came from. Only mention attachments are tied to the
/// text in the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOrigin {
    Mention,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Option<String>,
    pub origin: AttachmentOrigin,
    pub state: AttachmentState,
}

impl Attachment {
    pub fn is_ready(&self) -> bool {
        self.state == AttachmentState::Ready
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        match self.state {
            AttachmentState::ContentPending(id) => Some(id),
            _ => None,
        }
    }

    pub fn to_attached_file(&self) -> AttachedFile {
        AttachedFile {
            filename: self.filename.clone(),
            content: self.content.clone(),
        }
    }
}

/// Result of reconciling the store with the input text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextSync {
    /// Filenames newly selected; each needs a content fetch.
    pub added: Vec<String>,
    /// Mention attachments whose `@filename` left the text.
    pub removed: Vec<Attachment>,
}

/// Everything taken out of the store by a send.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendSnapshot {
    /// Ready attachments in the order they were added.
    pub ready: Vec<Attachment>,
    /// Attachments still waiting for content; they are dropped.
    pub discarded: Vec<Attachment>,
}

/// Attachments for the next outgoing message, unique by filename and kept in
/// insertion order.
#[derive(Debug, Default, Clone)]
pub struct AttachmentStore {
    entries: Vec<Attachment>,
}

impl AttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `filename` in the `Selected` state. Returns false if it is
    /// already tracked.
    pub fn select(&mut self, filename: &str, origin: AttachmentOrigin) -> bool {
        if self.contains(filename) {
            return false;
        }
        self.entries.push(Attachment {
            filename: filename.to_string(),
            content: None,
            origin,
            state: AttachmentState::Selected,
        });
        true
    }

    /// Records the request fetching `filename`'s content. Only valid from
    /// `Selected`.
    pub fn mark_pending(&mut self, filename: &str, request: RequestId) -> bool {
        match self.get_mut(filename) {
            Some(entry) if entry.state == AttachmentState::Selected => {
                entry.state = AttachmentState::ContentPending(request);
                true
            }
            _ => false,
        }
    }

    /// Stores content for the attachment waiting on `request`. A response for
    /// an entry that was removed (or re-selected under a new request) is
    /// ignored.
    pub fn resolve(&mut self, request: RequestId, content: String) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.state == AttachmentState::ContentPending(request))
        else {
            debug!(request, "Ignoring content for a retired attachment");
            return false;
        };
        entry.content = Some(content);
        entry.state = AttachmentState::Ready;
        true
    }

    /// Removes the attachment waiting on `request`, returning it so the
    /// caller can report the failure.
    pub fn fail(&mut self, request: RequestId) -> Option<Attachment> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.state == AttachmentState::ContentPending(request))?;
        Some(self.entries.remove(idx))
    }

    /// Removes `filename` in whatever state it is in.
    pub fn remove(&mut self, filename: &str) -> Option<Attachment> {
        let idx = self.entries.iter().position(|e| e.filename == filename)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, filename: &str) -> Option<&Attachment> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    fn get_mut(&mut self, filename: &str) -> Option<&mut Attachment> {
        self.entries.iter_mut().find(|e| e.filename == filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.get(filename).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reconciles mention attachments with `text`.
    ///
    /// Closed mentions not yet tracked are selected, except the one still
    /// being typed at `cursor`. Mention attachments whose reference no longer
    /// appears are removed. Manual attachments are left alone.
    pub fn sync_with_text(&mut self, text: &str, cursor: usize) -> TextSync {
        let open_start = find_open_token(text, cursor).map(|token| token.start);
        let tokens = extract_closed_tokens(text);
        let mentioned: HashSet<&str> = tokens.iter().map(|t| t.raw.as_str()).collect();

        let mut sync = TextSync::default();

        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.origin == AttachmentOrigin::Mention
                && !mentioned.contains(entry.filename.as_str())
            {
                sync.removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;

        for token in &tokens {
            if Some(token.start) == open_start {
                continue;
            }
            if self.select(&token.raw, AttachmentOrigin::Mention) {
                sync.added.push(token.raw.clone());
            }
        }

        sync
    }

    /// Empties the store for a send. Ready attachments are returned in the
    /// order they were added; everything else is discarded.
    pub fn take_for_send(&mut self) -> SendSnapshot {
        let (ready, discarded) = self.entries.drain(..).partition(Attachment::is_ready);
        SendSnapshot { ready, discarded }
    }

    /// Puts previously sent attachments back, skipping any filename that has
    /// been selected again since.
    pub fn restore(&mut self, attachments: Vec<Attachment>) {
        let mut restored = Vec::with_capacity(attachments.len() + self.entries.len());
        for attachment in attachments {
            if !self.contains(&attachment.filename) {
                restored.push(attachment);
            }
        }
        restored.append(&mut self.entries);
        self.entries = restored;
    }
}
