use crate::file::WorkspaceFile;

pub const DEFAULT_SUGGESTION_LIMIT: usize = 10;

/// Filters `candidates` to those whose path contains `query`, ignoring case.
///
/// Matches keep their input order (the workspace listing is already sorted)
/// and at most `limit` are returned. There is no relevance scoring.
pub fn rank(candidates: &[WorkspaceFile], query: &str, limit: usize) -> Vec<WorkspaceFile> {
    let query = query.to_lowercase();
    candidates
        .iter()
        .filter(|file| query.is_empty() || file.path().to_lowercase().contains(&query))
        .take(limit)
        .cloned()
        .collect()
}

/// Holds the cached workspace listing on the UI side and answers dropdown
/// queries against it.
#[derive(Debug, Clone)]
pub struct FileCompleter {
    files: Vec<WorkspaceFile>,
    limit: usize,
}

impl Default for FileCompleter {
    fn default() -> Self {
        Self::new(DEFAULT_SUGGESTION_LIMIT)
    }
}

impl FileCompleter {
    pub fn new(limit: usize) -> Self {
        Self {
            files: Vec::new(),
            limit,
        }
    }

    /// Replaces the cached listing with a fresh snapshot.
    pub fn set_files(&mut self, files: Vec<WorkspaceFile>) {
        self.files = files;
    }

    pub fn files(&self) -> &[WorkspaceFile] {
        &self.files
    }

    /// Returns all files (up to the limit) when the filter is empty.
    pub fn filter(&self, query: &str) -> Vec<WorkspaceFile> {
        rank(&self.files, query, self.limit)
    }
}
