//! Non-fatal diagnostics emitted while parsing and publishing.
//!
//! Recoverable problems (oversized attachments, truncated hierarchies,
//! malformed attributes) never fail an operation. They are reported as a
//! [`Warning`] through an injected [`DiagnosticSink`] and a safe default is
//! used instead.
//!
//! The sink is shared by parallel parser workers and concurrent attachment
//! uploads, so implementations must be `Send + Sync` and serialize their own
//! writes.

use std::path::PathBuf;
use std::sync::Mutex;

/// A recoverable problem that was handled by substituting a default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Warning {
    /// Sub-results nested deeper than the configured maximum were dropped.
    #[error("Maximum sub-result hierarchy level ({max}) reached for '{test}'; deeper results dropped")]
    MaxHierarchyLevelReached { test: String, max: usize },

    /// A level had more children than allowed; the excess was dropped.
    #[error("Test '{test}' has {found} sub-results at one level; only the first {max} are kept")]
    MaxSubResultsPerLevel {
        test: String,
        found: usize,
        max: usize,
    },

    /// An attribute could not be interpreted and a default was used.
    #[error("Invalid {attribute} '{value}' for '{test}'; using default")]
    MalformedAttribute {
        test: String,
        attribute: &'static str,
        value: String,
    },

    /// Run start/finish could not be used as a range.
    #[error("Run times are unusable ({reason}); start and finish omitted")]
    RunTimesDiscarded { reason: String },

    /// An attachment file does not exist.
    #[error("Attachment not found: {}", path.display())]
    AttachmentNotFound { path: PathBuf },

    /// An attachment exceeded the raw or encoded size limit.
    #[error("Attachment '{name}' exceeds the maximum allowed size ({size} > {limit} bytes)")]
    AttachmentTooLarge {
        name: String,
        size: u64,
        limit: u64,
    },

    /// An attachment could not be read.
    #[error("Unable to read attachment {}: {reason}", path.display())]
    AttachmentUnreadable { path: PathBuf, reason: String },

    /// The service rejected or failed an attachment upload.
    #[error("Failed to upload attachment '{name}': {reason}")]
    AttachmentUploadFailed { name: String, reason: String },

    /// A result document could not be loaded and was left out.
    #[error("Skipping result document {}: {reason}", path.display())]
    DocumentSkipped { path: PathBuf, reason: String },

    /// Run attachments could not be archived; they are uploaded one by one.
    #[error("Unable to archive run attachments, uploading individually: {reason}")]
    ArchiveFailed { reason: String },
}

/// Destination for warnings and debug lines.
pub trait DiagnosticSink: Send + Sync {
    /// Records a recoverable problem.
    fn warning(&self, warning: Warning);

    /// Records a debug line. Ignored by default.
    fn debug(&self, _message: &str) {}
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warning(&self, warning: Warning) {
        tracing::warn!("{}", warning);
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

/// Collects warnings in memory and also forwards them to `tracing`.
///
/// Used by tests and by callers that report the warning count.
#[derive(Debug, Default)]
pub struct MemorySink {
    warnings: Mutex<Vec<Warning>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the warnings recorded so far.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.warnings.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for MemorySink {
    fn warning(&self, warning: Warning) {
        tracing::warn!("{}", warning);
        if let Ok(mut guard) = self.warnings.lock() {
            guard.push(warning);
        }
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}
