use std::fmt;

use thiserror::Error;

/// Error information reported by an image sink.
///
/// `code` is the platform error code (an `esp_err_t` on the device), `message`
/// a human readable rendering of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError {
    pub code: i32,
    pub message: String,
}

impl SinkError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for SinkError {}

/// Everything that can go wrong while updating or restoring.
///
/// The `Display` text is what the HTTP layer sends back as the diagnostic.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("Checksum parameter invalid: {0}")]
    InvalidChecksum(String),

    #[error("Failed to start update process: {0}")]
    SinkStartFailure(SinkError),

    #[error("Failed to write chunked data to free space ({written} of {expected} bytes written){}", detail_suffix(.detail))]
    SinkWriteShortfall {
        written: usize,
        expected: usize,
        detail: Option<SinkError>,
    },

    #[error("Update could not be finalized: {0}")]
    SinkFinalizeFailure(SinkError),

    #[error("Backup root {0} does not exist")]
    WalkerRootMissing(String),

    #[error("No update in progress")]
    NotReceiving,

    #[error("Chunk out of order: expected offset {expected}, got {got}")]
    ChunkOutOfOrder { expected: usize, got: usize },

    #[error("Invalid upload path: {0}")]
    InvalidUploadPath(String),

    #[error("No file upload in progress for {0}")]
    NoFileUpload(String),

    #[error("File store error: {0}")]
    FileStore(#[from] std::io::Error),
}

fn detail_suffix(detail: &Option<SinkError>) -> String {
    match detail {
        Some(err) => format!(": {err}"),
        None => String::new(),
    }
}
