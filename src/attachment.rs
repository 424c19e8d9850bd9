//! Attachment validation and packaging.
//!
//! Turns candidate attachment paths (and captured console text) into
//! upload-ready [`AttachmentRequestModel`]s. Every check failure is a
//! [`Warning`] and a `None`, never an error:
//!
//! ```text
//! path ──► exists? ──► raw size <= max_file_size? ──► read + base64
//!                                                        │
//!        None + warning ◄── any check fails              ▼
//!                              encoded size <= max_encoded_size?
//!                                                        │
//!                                       sanitize name, classify type
//! ```
//!
//! Run-level attachments may instead be bundled into one archive, see
//! [`archive`].

pub mod archive;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticSink, Warning};
use crate::service::AttachmentRequestModel;

/// Largest attachment file accepted, in bytes (75 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 75 * 1024 * 1024;

/// Largest base64 payload accepted, in bytes (100 MB).
pub const DEFAULT_MAX_ENCODED_SIZE: u64 = 100 * 1024 * 1024;

/// File name used for captured standard output.
pub const CONSOLE_LOG_FILE_NAME: &str = "Standard_Console_Output.log";

/// File name used for captured standard error.
pub const STANDARD_ERROR_FILE_NAME: &str = "Standard_Console_Error.log";

/// Attachment type tag sent with each upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentType {
    GeneralAttachment,
    CodeCoverage,
    TmiTestRunSummary,
    TestImpactDetails,
    IntermediateCollectorData,
    ConsoleLog,
}

impl AttachmentType {
    /// Classifies a file by extension and stem.
    ///
    /// ```
    /// use testpub::attachment::AttachmentType;
    ///
    /// assert_eq!(AttachmentType::classify("run.coverage"), AttachmentType::CodeCoverage);
    /// assert_eq!(AttachmentType::classify("TestImpact.xml"), AttachmentType::TestImpactDetails);
    /// assert_eq!(AttachmentType::classify("notes.txt"), AttachmentType::GeneralAttachment);
    /// ```
    pub fn classify(file_name: &str) -> Self {
        let path = Path::new(file_name);
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");

        if extension.eq_ignore_ascii_case("coverage") {
            AttachmentType::CodeCoverage
        } else if extension.eq_ignore_ascii_case("trx") {
            AttachmentType::TmiTestRunSummary
        } else if stem.eq_ignore_ascii_case("testimpact") {
            AttachmentType::TestImpactDetails
        } else if stem.eq_ignore_ascii_case("SystemInformation") {
            AttachmentType::IntermediateCollectorData
        } else {
            AttachmentType::GeneralAttachment
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentType::GeneralAttachment => "GeneralAttachment",
            AttachmentType::CodeCoverage => "CodeCoverage",
            AttachmentType::TmiTestRunSummary => "TmiTestRunSummary",
            AttachmentType::TestImpactDetails => "TestImpactDetails",
            AttachmentType::IntermediateCollectorData => "IntermediateCollectorData",
            AttachmentType::ConsoleLog => "ConsoleLog",
        }
    }
}

/// Size caps for a single attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentLimits {
    pub max_file_size: u64,
    pub max_encoded_size: u64,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_encoded_size: DEFAULT_MAX_ENCODED_SIZE,
        }
    }
}

/// Replaces characters the attachment API does not accept.
pub fn sanitize_file_name(name: &str) -> String {
    name.replace(':', "_")
}

/// Removes case-insensitive duplicates, keeping the first spelling seen.
pub fn unique_paths<'a, I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.to_string_lossy().to_lowercase()))
        .cloned()
        .collect()
}

/// Validates and encodes attachments against [`AttachmentLimits`].
#[derive(Clone)]
pub struct AttachmentResolver {
    limits: AttachmentLimits,
    sink: Arc<dyn DiagnosticSink>,
}

impl AttachmentResolver {
    pub fn new(limits: AttachmentLimits, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { limits, sink }
    }

    pub fn limits(&self) -> AttachmentLimits {
        self.limits
    }

    /// Builds an upload request for the file at `path`.
    ///
    /// Returns `None` (after a warning) if the file is missing, unreadable
    /// or too large.
    pub async fn resolve_file(&self, path: &Path) -> Option<AttachmentRequestModel> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                self.sink.warning(Warning::AttachmentNotFound {
                    path: path.to_path_buf(),
                });
                return None;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if metadata.len() > self.limits.max_file_size {
            self.sink.warning(Warning::AttachmentTooLarge {
                name: file_name,
                size: metadata.len(),
                limit: self.limits.max_file_size,
            });
            return None;
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.sink.warning(Warning::AttachmentUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let stream = self.encode(&file_name, &bytes)?;
        Some(AttachmentRequestModel {
            stream,
            attachment_type: AttachmentType::classify(&file_name).as_str().to_string(),
            file_name: sanitize_file_name(&file_name),
            comment: String::new(),
        })
    }

    /// Builds a console-log upload request for captured text.
    ///
    /// Blank text yields `None` without a warning.
    pub fn resolve_text(&self, text: &str, file_name: &str) -> Option<AttachmentRequestModel> {
        if text.trim().is_empty() {
            return None;
        }

        let size = text.len() as u64;
        if size > self.limits.max_file_size {
            self.sink.warning(Warning::AttachmentTooLarge {
                name: file_name.to_string(),
                size,
                limit: self.limits.max_file_size,
            });
            return None;
        }

        let stream = self.encode(file_name, text.as_bytes())?;
        Some(AttachmentRequestModel {
            stream,
            file_name: file_name.to_string(),
            comment: String::new(),
            attachment_type: AttachmentType::ConsoleLog.as_str().to_string(),
        })
    }

    fn encode(&self, name: &str, bytes: &[u8]) -> Option<String> {
        let stream = BASE64.encode(bytes);
        let encoded = stream.len() as u64;
        if encoded > self.limits.max_encoded_size {
            self.sink.warning(Warning::AttachmentTooLarge {
                name: name.to_string(),
                size: encoded,
                limit: self.limits.max_encoded_size,
            });
            return None;
        }
        Some(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use tempfile::TempDir;

    fn resolver(limits: AttachmentLimits) -> (AttachmentResolver, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (AttachmentResolver::new(limits, sink.clone()), sink)
    }

    #[test]
    fn test_classify() {
        assert_eq!(AttachmentType::classify("a.COVERAGE"), AttachmentType::CodeCoverage);
        assert_eq!(AttachmentType::classify("run.trx"), AttachmentType::TmiTestRunSummary);
        assert_eq!(AttachmentType::classify("testimpact.xml"), AttachmentType::TestImpactDetails);
        assert_eq!(
            AttachmentType::classify("systeminformation.xml"),
            AttachmentType::IntermediateCollectorData
        );
        assert_eq!(AttachmentType::classify("trx.log"), AttachmentType::GeneralAttachment);
    }

    #[test]
    fn test_unique_paths_case_insensitive() {
        let paths = vec![
            PathBuf::from("out/A.LOG"),
            PathBuf::from("out/b.log"),
            PathBuf::from("out/a.log"),
        ];
        assert_eq!(
            unique_paths(&paths),
            vec![PathBuf::from("out/A.LOG"), PathBuf::from("out/b.log")]
        );
    }

    #[tokio::test]
    async fn test_resolve_file_encodes_and_sanitizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run:1.trx");
        std::fs::write(&path, b"hello").unwrap();
        let (resolver, sink) = resolver(AttachmentLimits::default());

        let request = resolver.resolve_file(&path).await.unwrap();

        assert_eq!(request.file_name, "run_1.trx");
        assert_eq!(request.stream, "aGVsbG8=");
        assert_eq!(request.attachment_type, "TmiTestRunSummary");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_missing_file_warns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.log");
        let (resolver, sink) = resolver(AttachmentLimits::default());

        assert!(resolver.resolve_file(&path).await.is_none());
        assert_eq!(sink.warnings(), vec![Warning::AttachmentNotFound { path }]);
    }

    #[tokio::test]
    async fn test_resolve_file_size_caps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 30]).unwrap();

        let (raw_capped, sink) = resolver(AttachmentLimits {
            max_file_size: 29,
            max_encoded_size: 1000,
        });
        assert!(raw_capped.resolve_file(&path).await.is_none());
        assert_eq!(
            sink.warnings(),
            vec![Warning::AttachmentTooLarge {
                name: "big.bin".into(),
                size: 30,
                limit: 29
            }]
        );

        // 30 raw bytes encode to 40 base64 characters.
        let (encoded_capped, sink) = resolver(AttachmentLimits {
            max_file_size: 30,
            max_encoded_size: 39,
        });
        assert!(encoded_capped.resolve_file(&path).await.is_none());
        assert_eq!(sink.len(), 1);

        let (fits, _) = resolver(AttachmentLimits {
            max_file_size: 30,
            max_encoded_size: 40,
        });
        assert!(fits.resolve_file(&path).await.is_some());
    }

    #[test]
    fn test_resolve_text() {
        let (resolver, sink) = resolver(AttachmentLimits::default());

        assert!(resolver.resolve_text("  \n", CONSOLE_LOG_FILE_NAME).is_none());
        let request = resolver.resolve_text("boom", STANDARD_ERROR_FILE_NAME).unwrap();
        assert_eq!(request.file_name, "Standard_Console_Error.log");
        assert_eq!(request.attachment_type, "ConsoleLog");
        assert_eq!(BASE64.decode(&request.stream).unwrap(), b"boom");
        assert!(sink.is_empty());
    }
}
