use crate::bus::BusConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the file reference subsystem, stored as TOML. Every section
/// and field has a default so partial files load cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Workspace listing and ignore rules
    #[serde(default)]
    pub file: FileSettings,

    /// `@` dropdown behaviour
    #[serde(default)]
    pub suggestions: SuggestionSettings,

    /// Request/response bus between the panel and the host
    #[serde(default)]
    pub bus: BusSettings,

    /// Attachment fetching and send behaviour
    #[serde(default)]
    pub attachments: AttachmentSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Cap on the number of files a workspace listing returns
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Extra gitignore-style patterns applied on top of `.gitignore`
    #[serde(default)]
    pub extra_ignore_patterns: Vec<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            extra_ignore_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionSettings {
    #[serde(default = "default_suggestion_limit")]
    pub limit: usize,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            limit: default_suggestion_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    /// 0 disables the timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BusSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            request_timeout: self.request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSettings {
    /// Content fetches allowed in flight at once
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Put ready attachments back when the model call fails
    #[serde(default)]
    pub restore_on_send_failure: bool,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            restore_on_send_failure: false,
        }
    }
}

fn default_max_results() -> usize {
    100
}

fn default_suggestion_limit() -> usize {
    crate::suggest::DEFAULT_SUGGESTION_LIMIT
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_fetches() -> usize {
    4
}
