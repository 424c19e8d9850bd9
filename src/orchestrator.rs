//! Composition of parsing and publishing.
//!
//! # Flow
//!
//! ```text
//!   RunContext (config + flags)
//!       │ prepare_context: clear platform/configuration when build id is 0,
//!       │                  default title "{runner}_TestResults_{build id}"
//!       ▼
//!   files ──► TrxReader::read_results ──► Vec<Run>
//!                                            │ merge_results?
//!                                            ▼
//!                                   one Run, or one per file
//!                                            │
//!                                            ▼
//!                               BatchPublisher::publish (each run)
//!                                            │
//!                                            ▼
//!                                       RunSummary
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use testpub::config::load_config;
//! use testpub::diagnostics::TracingSink;
//! use testpub::orchestrator::Orchestrator;
//! use testpub::service::InMemoryService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testpub.toml"))?;
//!     let context = config.run.clone();
//!     let orchestrator = Orchestrator::new(config, InMemoryService::new(), Arc::new(TracingSink));
//!
//!     let files = vec![PathBuf::from("results.trx")];
//!     let summary = orchestrator
//!         .publish_files(&files, context, &CancellationToken::new())
//!         .await?;
//!
//!     std::process::exit(summary.exit_code());
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, Warning};
use crate::model::{Outcome, Run, RunContext};
use crate::parser::{ResultReader, TrxReader};
use crate::publisher::BatchPublisher;
use crate::service::TestResultsService;

/// Aggregated outcome of publishing one or more runs.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Published; no failed results, or the fail policy is off |
/// | 1 | Published, some results failed and `fail_on_failed_tests` is set |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub runs_published: usize,
    pub total_results: usize,
    pub passed: usize,
    pub failed: usize,
    /// Inconclusive and not-executed results.
    pub other: usize,
    pub attachments_uploaded: usize,
    pub attachments_skipped: usize,
    pub attachments_failed: usize,
    pub warnings: usize,
    pub had_failed_results: bool,
    pub fail_on_failed_tests: bool,
    pub web_access_urls: Vec<String>,
}

impl RunSummary {
    /// Returns the process exit code under the fail-job policy.
    ///
    /// ```
    /// use testpub::orchestrator::RunSummary;
    ///
    /// let summary = RunSummary {
    ///     had_failed_results: true,
    ///     fail_on_failed_tests: false,
    ///     ..Default::default()
    /// };
    /// assert_eq!(summary.exit_code(), 0);
    /// ```
    pub fn exit_code(&self) -> i32 {
        if self.had_failed_results && self.fail_on_failed_tests {
            1
        } else {
            0
        }
    }

    fn count_run(&mut self, run: &Run) {
        self.total_results += run.results.len();
        self.passed += run.count(Outcome::Passed);
        self.failed += run.count(Outcome::Failed);
        self.other += run.count(Outcome::Inconclusive) + run.count(Outcome::NotExecuted);
    }
}

/// Sink wrapper that counts warnings on their way through.
struct CountingSink {
    inner: Arc<dyn DiagnosticSink>,
    warnings: AtomicUsize,
}

impl DiagnosticSink for CountingSink {
    fn warning(&self, warning: Warning) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        self.inner.warning(warning);
    }

    fn debug(&self, message: &str) {
        self.inner.debug(message);
    }
}

/// Parses result documents and publishes them as runs.
pub struct Orchestrator<S> {
    config: Config,
    publisher: BatchPublisher<S>,
    sink: Arc<CountingSink>,
    now: Option<DateTime<Utc>>,
}

impl<S: TestResultsService> Orchestrator<S> {
    pub fn new(config: Config, service: S, sink: Arc<dyn DiagnosticSink>) -> Self {
        let sink = Arc::new(CountingSink {
            inner: sink,
            warnings: AtomicUsize::new(0),
        });
        let publisher = BatchPublisher::new(service, config.publish_options(), sink.clone());
        Self {
            config,
            publisher,
            sink,
            now: None,
        }
    }

    /// Pins the parser clock.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn service(&self) -> &S {
        self.publisher.service()
    }

    /// Applies build-less clearing and the default run title.
    pub fn prepare_context(&self, mut context: RunContext) -> RunContext {
        if context.build_id == 0 {
            context.platform = None;
            context.configuration = None;
        }
        if context.run_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            context.run_name = Some(format!(
                "{}_TestResults_{}",
                self.config.publish.runner, context.build_id
            ));
        }
        context
    }

    fn reader(&self) -> TrxReader {
        let reader = TrxReader::new(self.config.parser_options(), self.sink.clone());
        match self.now {
            Some(now) => reader.with_now(now),
            None => reader,
        }
    }

    /// Parses `files` into the runs that would be published.
    ///
    /// Unreadable documents are skipped with a warning; it is an error only
    /// when none of them can be read.
    pub fn parse_runs(&self, files: &[PathBuf], context: &RunContext) -> anyhow::Result<Vec<Run>> {
        if files.is_empty() {
            bail!("No result files given");
        }

        let reader = self.reader();
        let mut runs = Vec::with_capacity(files.len());
        for file in files {
            match reader.read_results(file, context) {
                Ok(run) => {
                    info!("Read {} results from {}", run.results.len(), file.display());
                    runs.push(run);
                }
                Err(e) => self.sink.warning(Warning::DocumentSkipped {
                    path: file.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        if runs.is_empty() {
            bail!("None of the {} result files could be read", files.len());
        }

        if self.config.publish.merge_results {
            return Ok(merge_runs(runs).into_iter().collect());
        }

        if runs.len() > 1 {
            for (index, run) in runs.iter_mut().enumerate() {
                run.name = format!("{}_{}", run.name, index + 1);
            }
        }
        Ok(runs)
    }

    /// Parses and publishes `files`.
    ///
    /// # Errors
    ///
    /// Returns an error if no file can be read or a publish fails
    /// structurally. Runs published before the failure stay published.
    pub async fn publish_files(
        &self,
        files: &[PathBuf],
        context: RunContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let context = self.prepare_context(context);
        let runs = self.parse_runs(files, &context)?;

        let mut summary = RunSummary {
            fail_on_failed_tests: self.config.publish.fail_on_failed_tests,
            ..RunSummary::default()
        };
        for mut run in runs {
            let outcome = self
                .publisher
                .publish(&mut run, cancel)
                .await
                .with_context(|| format!("Failed to publish test run '{}'", run.name))?;

            summary.runs_published += 1;
            summary.count_run(&run);
            summary.had_failed_results |= outcome.had_failed_results;
            summary.attachments_uploaded += outcome.attachments_uploaded;
            summary.attachments_skipped += outcome.attachments_skipped;
            summary.attachments_failed += outcome.attachments_failed;
            summary.web_access_urls.extend(outcome.web_access_url);
        }
        summary.warnings = self.sink.warnings.load(Ordering::Relaxed);
        Ok(summary)
    }
}

/// Concatenates runs in order into the first one.
///
/// The merged run starts at the earliest known start and completes at the
/// latest known finish.
pub fn merge_runs(runs: Vec<Run>) -> Option<Run> {
    let mut iter = runs.into_iter();
    let mut merged = iter.next()?;
    for run in iter {
        merged.started = earliest(merged.started, run.started);
        merged.completed = latest(merged.completed, run.completed);
        merged.attachments.extend(run.attachments);
        merged.results.extend(run.results);
    }
    Some(merged)
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::service::InMemoryService;
    use crate::service::memory::ServiceCall;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn trx(tests: &[(&str, &str)], start: &str, finish: &str) -> String {
        let mut definitions = String::new();
        let mut results = String::new();
        for (name, outcome) in tests {
            let id = uuid::Uuid::new_v4();
            definitions.push_str(&format!(r#"<UnitTest name="{name}" id="{id}" />"#));
            results.push_str(&format!(
                r#"<UnitTestResult testId="{id}" testName="{name}" outcome="{outcome}" duration="00:00:01" />"#
            ));
        }
        format!(
            r#"<TestRun><Times start="{start}" finish="{finish}" /><TestDefinitions>{definitions}</TestDefinitions><Results>{results}</Results></TestRun>"#
        )
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn orchestrator(config: Config) -> Orchestrator<InMemoryService> {
        Orchestrator::new(config, InMemoryService::new(), Arc::new(MemorySink::new()))
            .with_now(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_prepare_context_clears_build_less_values() {
        let orchestrator = orchestrator(Config::default());
        let context = orchestrator.prepare_context(RunContext {
            platform: Some("x64".into()),
            configuration: Some("Debug".into()),
            ..Default::default()
        });

        assert!(context.platform.is_none());
        assert!(context.configuration.is_none());
        assert_eq!(context.run_name.as_deref(), Some("VSTest_TestResults_0"));

        let context = orchestrator.prepare_context(RunContext {
            build_id: 9,
            platform: Some("x64".into()),
            run_name: Some("Nightly".into()),
            ..Default::default()
        });
        assert_eq!(context.platform.as_deref(), Some("x64"));
        assert_eq!(context.run_name.as_deref(), Some("Nightly"));
    }

    #[test]
    fn test_merge_runs_spans_all_documents() {
        let dir = TempDir::new().unwrap();
        let first = write(
            &dir,
            "a.trx",
            &trx(&[("A", "Passed")], "2024-01-01T10:00:00Z", "2024-01-01T10:10:00Z"),
        );
        let second = write(
            &dir,
            "b.trx",
            &trx(&[("B", "Failed"), ("C", "Passed")], "2024-01-01T09:00:00Z", "2024-01-01T09:30:00Z"),
        );

        let orchestrator = orchestrator(Config::default());
        let runs = orchestrator
            .parse_runs(&[first.clone(), second.clone()], &RunContext::default())
            .unwrap();

        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        let names: Vec<_> = run
            .results
            .iter()
            .filter_map(|r| r.automated_test_name.as_deref())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(run.started, Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
        assert_eq!(run.completed, Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 10, 0).unwrap()));
        assert_eq!(run.attachments, vec![first, second]);
    }

    #[test]
    fn test_unmerged_runs_get_indexed_names() {
        let dir = TempDir::new().unwrap();
        let doc = trx(&[("A", "Passed")], "2024-01-01T10:00:00Z", "2024-01-01T10:10:00Z");
        let files = vec![write(&dir, "a.trx", &doc), write(&dir, "b.trx", &doc)];

        let mut config = Config::default();
        config.publish.merge_results = false;
        let orchestrator = orchestrator(config);
        let context = orchestrator.prepare_context(RunContext::default());
        let runs = orchestrator.parse_runs(&files, &context).unwrap();

        let names: Vec<_> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["VSTest_TestResults_0_1", "VSTest_TestResults_0_2"]);
    }

    #[test]
    fn test_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let good = write(
            &dir,
            "good.trx",
            &trx(&[("A", "Passed")], "2024-01-01T10:00:00Z", "2024-01-01T10:10:00Z"),
        );
        let bad = write(&dir, "bad.trx", "not xml at all <");

        let orchestrator = orchestrator(Config::default());
        let runs = orchestrator
            .parse_runs(&[bad.clone(), good], &RunContext::default())
            .unwrap();
        assert_eq!(runs[0].results.len(), 1);

        assert!(orchestrator.parse_runs(&[bad], &RunContext::default()).is_err());
        assert!(orchestrator.parse_runs(&[], &RunContext::default()).is_err());
    }

    #[tokio::test]
    async fn test_skipped_documents_reach_sink_and_summary() {
        let dir = TempDir::new().unwrap();
        let good = write(
            &dir,
            "good.trx",
            &trx(&[("A", "Passed")], "2024-01-01T10:00:00Z", "2024-01-01T10:10:00Z"),
        );
        let bad = write(&dir, "bad.trx", "<NotARun/>");

        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(Config::default(), InMemoryService::new(), sink.clone());
        let summary = orchestrator
            .publish_files(&[bad.clone(), good], RunContext::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total_results, 1);
        assert_eq!(summary.warnings, 1);
        let warnings = sink.warnings();
        assert!(matches!(
            &warnings[0],
            Warning::DocumentSkipped { path, .. } if *path == bad
        ));
    }

    #[tokio::test]
    async fn test_publish_files_summary_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "run.trx",
            &trx(
                &[("A", "Passed"), ("B", "Failed"), ("C", "NotExecuted")],
                "2024-01-01T10:00:00Z",
                "2024-01-01T10:10:00Z",
            ),
        );

        let mut config = Config::default();
        config.publish.fail_on_failed_tests = true;
        config.publish.batch_size = 2;
        let orchestrator = orchestrator(config);

        let summary = orchestrator
            .publish_files(&[file], RunContext::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.runs_published, 1);
        assert_eq!(summary.total_results, 3);
        assert_eq!((summary.passed, summary.failed, summary.other), (1, 1, 1));
        assert!(summary.had_failed_results);
        assert_eq!(summary.exit_code(), 1);
        // The document itself is the only run attachment.
        assert_eq!(summary.attachments_uploaded, 1);
        assert_eq!(orchestrator.service().batch_sizes(), vec![2, 1]);

        let calls = orchestrator.service().calls();
        let ServiceCall::CreateRun(created) = &calls[0] else {
            panic!("expected create_run first");
        };
        assert_eq!(created.name, "VSTest_TestResults_0");
    }
}
