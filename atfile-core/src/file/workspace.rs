use crate::file::{error::FileError, ignore::IgnoreMatcher};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file inside the workspace, addressed by its posix-separated path
/// relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceFile(String);

impl WorkspaceFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// True when `name` is this path or a trailing run of its segments.
    pub fn matches_name(&self, name: &str) -> bool {
        self.0 == name
            || self
                .0
                .strip_suffix(name)
                .is_some_and(|prefix| prefix.ends_with('/'))
    }
}

impl fmt::Display for WorkspaceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceFile {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub file: WorkspaceFile,
    /// Set when no existing file matched and a new one was created at the
    /// workspace root.
    pub created: bool,
}

/// Host-side view of one workspace root: ignore-filtered listing plus
/// name-based read and write.
///
/// Listings are snapshots taken per call. Names given to `read_file` and
/// `write_file` resolve against the whole tree, ignored files included, so
/// anything written can be read back. Reads take no locks; writes are
/// serialized per target file.
#[derive(Clone)]
pub struct Workspace {
    root: PathBuf,
    extra_patterns: Arc<Vec<String>>,
    matcher: Arc<RwLock<Arc<IgnoreMatcher>>>,
    write_locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Workspace {
    pub fn new(root: PathBuf, extra_patterns: Vec<String>) -> Self {
        // Editors can keep a folder open after it was deleted on disk
        let root = if root.exists() {
            root.canonicalize().unwrap_or(root)
        } else {
            warn!("Workspace root does not exist: {}", root.display());
            root
        };

        let matcher = IgnoreMatcher::load(&root, &extra_patterns);
        Self {
            root,
            extra_patterns: Arc::new(extra_patterns),
            matcher: Arc::new(RwLock::new(Arc::new(matcher))),
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn matcher(&self) -> Arc<IgnoreMatcher> {
        self.matcher
            .read()
            .expect("ignore matcher lock poisoned")
            .clone()
    }

    /// Rebuilds the ignore rules from `.gitignore` and configured patterns.
    pub fn reload(&self) {
        let matcher = IgnoreMatcher::load(&self.root, &self.extra_patterns);
        *self.matcher.write().expect("ignore matcher lock poisoned") = Arc::new(matcher);
        info!("Reloaded ignore rules for {}", self.root.display());
    }

    /// Sorted, ignore-filtered listing capped at `max_results`.
    pub async fn list_files(&self, max_results: usize) -> Vec<WorkspaceFile> {
        let mut files = self.snapshot(Some(self.matcher())).await;
        if files.len() > max_results {
            debug!(
                total = files.len(),
                max_results, "Truncating workspace listing"
            );
            files.truncate(max_results);
        }
        files
    }

    /// Every file in the tree whose path equals `name` or ends with
    /// `/<name>`, in lexicographic order. Ignore rules do not apply here.
    pub async fn matches(&self, name: &str) -> Vec<WorkspaceFile> {
        let Some(name) = normalize_name(name) else {
            return Vec::new();
        };
        self.snapshot(None)
            .await
            .into_iter()
            .filter(|file| file.matches_name(&name))
            .collect()
    }

    /// Reads the first file matching `name`.
    pub async fn read_file(&self, name: &str) -> Result<String, FileError> {
        let Some(file) = self.matches(name).await.into_iter().next() else {
            return Err(FileError::NotFound(name.to_string()));
        };

        let path = self.root.join(file.path());
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::NotFound(name.to_string()))
            }
            Err(e) => Err(FileError::Unreadable {
                filename: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Replaces the content of the first file matching `name`. When nothing
    /// matches, creates `<root>/<name>`.
    pub async fn write_file(&self, name: &str, content: &str) -> Result<WriteOutcome, FileError> {
        let Some(normalized) = normalize_name(name) else {
            return Err(FileError::write_failure(
                name,
                "path must be relative to the workspace root",
            ));
        };
        if !self.root.is_dir() {
            return Err(FileError::write_failure(
                name,
                "workspace root does not exist",
            ));
        }

        let (file, created) = match self.matches(&normalized).await.into_iter().next() {
            Some(existing) => (existing, false),
            None => (WorkspaceFile::new(normalized), true),
        };
        let target = self.root.join(file.path());

        let lock = self.write_lock(&target);
        let result = self.write_locked(&lock, &file, &target, name, content, created).await;
        drop(lock);
        self.release_write_lock(&target);
        result?;

        if file.path() == ".gitignore" {
            self.reload();
        }

        Ok(WriteOutcome { file, created })
    }

    async fn write_locked(
        &self,
        lock: &tokio::sync::Mutex<()>,
        file: &WorkspaceFile,
        target: &Path,
        name: &str,
        content: &str,
        created: bool,
    ) -> Result<(), FileError> {
        let _guard = lock.lock().await;

        if created {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FileError::write_failure(name, e))?;
            }
            warn!(file = %file, "No existing match, creating file at workspace root");
        }

        fs::write(target, content)
            .await
            .map_err(|e| FileError::write_failure(name, e))?;
        info!(file = %file, created, bytes = content.len(), "Wrote workspace file");
        Ok(())
    }

    /// Walks the tree, skipping whatever `matcher` ignores when one is given.
    async fn snapshot(&self, matcher: Option<Arc<IgnoreMatcher>>) -> Vec<WorkspaceFile> {
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || scan(&root, matcher.as_deref())).await {
            Ok(files) => files,
            Err(e) => {
                warn!(?e, "Workspace scan task failed");
                Vec::new()
            }
        }
    }

    fn write_lock(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .expect("write lock table poisoned")
            .entry(target.to_path_buf())
            .or_default()
            .clone()
    }

    /// Drops the table entry once no other writer holds it.
    fn release_write_lock(&self, target: &Path) {
        let mut locks = self.write_locks.lock().expect("write lock table poisoned");
        if locks
            .get(target)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(target);
        }
    }
}

fn scan(root: &Path, matcher: Option<&IgnoreMatcher>) -> Vec<WorkspaceFile> {
    if !root.is_dir() {
        warn!("Cannot list missing workspace root {}", root.display());
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Some(matcher) = matcher else {
                return true;
            };
            let Some(relative) = relative_path(root, entry.path()) else {
                return false;
            };
            if entry.file_type().is_dir() {
                !matcher.is_ignored_dir(&relative)
            } else {
                !matcher.is_ignored(&relative)
            }
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(?e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_path(root, entry.path()) {
            files.push(WorkspaceFile::new(relative));
        }
    }

    files.sort();
    files
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

/// Normalizes a user supplied name to a posix relative path. Absolute paths
/// and paths escaping the root are rejected.
fn normalize_name(name: &str) -> Option<String> {
    let name = name.trim().replace('\\', "/");
    let path = Path::new(&name);

    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
