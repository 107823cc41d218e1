use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Failed to read file {filename}: {reason}")]
    Unreadable { filename: String, reason: String },

    #[error("Failed to write file {filename}: {reason}")]
    WriteFailure { filename: String, reason: String },
}

impl FileError {
    pub(crate) fn write_failure(filename: &str, reason: impl ToString) -> Self {
        Self::WriteFailure {
            filename: filename.to_string(),
            reason: reason.to_string(),
        }
    }
}
