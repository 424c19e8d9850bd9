//! Result document parsing.
//!
//! A [`ResultReader`] converts one source document into the canonical
//! [`Run`](crate::model::Run) model. The contract every format adapter must
//! satisfy:
//!
//! - Only a document that cannot be loaded at all is an error
//!   ([`ParseError`]). Malformed individual nodes degrade to defaults and a
//!   [`Warning`](crate::diagnostics::Warning).
//! - Results missing an automated test name or a title are dropped.
//! - Sub-result trees respect the configured
//!   [`HierarchyLimits`](crate::limits::HierarchyLimits).
//! - Results keep their source order.
//!
//! # Built-in Readers
//!
//! | Implementation | Format |
//! |----------------|--------|
//! | [`trx::TrxReader`] | Visual Studio `.trx` |

pub mod time;
pub mod trx;
pub mod xml;

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

use crate::limits::HierarchyLimits;
use crate::model::{Run, RunContext};

pub use trx::TrxReader;

/// Result type for document parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Structural failures that prevent a document from being read.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The document could not be read from disk.
    #[error("Failed to read result document: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not well-formed XML.
    #[error("Invalid XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// The document has no root element.
    #[error("Result document has no root element")]
    MissingRoot,

    /// The document is well-formed but not a result document.
    #[error("Malformed result document: {0}")]
    Malformed(String),
}

/// Options shared by all readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Add the source document itself to the run attachments.
    pub include_results_file: bool,

    /// Depth and fan-out caps for sub-results.
    pub limits: HierarchyLimits,

    /// Result timestamps earlier than this are replaced by the current time.
    pub min_valid_date: DateTime<Utc>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            include_results_file: true,
            limits: HierarchyLimits::default(),
            min_valid_date: default_min_valid_date(),
        }
    }
}

/// The earliest date the results service stores (SQL `datetime` minimum).
pub fn default_min_valid_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1753, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Converts a result document into the canonical model.
///
/// Readers must be `Send + Sync` so one instance can serve several
/// documents from parallel tasks.
pub trait ResultReader: Send + Sync {
    /// Short name of the producing tool, used in synthesized run names.
    fn name(&self) -> &str;

    /// Reads the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the document cannot be loaded or is not a
    /// result document at all.
    fn read_results(&self, path: &Path, context: &RunContext) -> ParseResult<Run>;
}
