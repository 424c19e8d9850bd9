//! testpub: publish machine-generated test results to a test-management service.
//!
//! Result documents (Visual Studio `.trx`) are parsed into a canonical,
//! format-agnostic run model and published in batches through a
//! [`service::TestResultsService`], with depth, fan-out and attachment size
//! limits applied along the way.
//!
//! # Architecture
//!
//! - **Model**: [`model::Run`], [`model::TestResult`] and the sub-result tree
//! - **Parser**: [`parser::TrxReader`] converts documents into the model
//! - **Attachments**: [`attachment::AttachmentResolver`] validates and encodes files
//! - **Publisher**: [`publisher::BatchPublisher`] drives the service calls
//! - **Orchestrator**: [`orchestrator::Orchestrator`] wires files, config and publisher
//!
//! Recoverable problems are reported as [`diagnostics::Warning`]s through an
//! injected [`diagnostics::DiagnosticSink`]; only structural failures are
//! errors.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use testpub::diagnostics::TracingSink;
//! use testpub::model::RunContext;
//! use testpub::parser::{ParserOptions, ResultReader, TrxReader};
//!
//! let reader = TrxReader::new(ParserOptions::default(), Arc::new(TracingSink));
//! let run = reader.read_results(Path::new("results.trx"), &RunContext::default())?;
//! println!("{}: {} results", run.name, run.results.len());
//! # Ok::<(), testpub::parser::ParseError>(())
//! ```

pub mod attachment;
pub mod config;
pub mod diagnostics;
pub mod limits;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod publisher;
pub mod report;
pub mod service;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use diagnostics::{DiagnosticSink, MemorySink, TracingSink, Warning};
pub use model::{Outcome, Run, RunContext, TestResult};
pub use orchestrator::{Orchestrator, RunSummary};
pub use parser::{ResultReader, TrxReader};
pub use publisher::{AttachmentMode, BatchPublisher, PublishError, PublishOptions, PublishOutcome};
pub use service::{InMemoryService, ServiceError, TestResultsService};
