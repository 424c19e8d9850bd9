//! Visual Studio TRX reader.
//!
//! # Document Layout
//!
//! ```text
//! TestRun
//! ├── Times @start @finish
//! ├── TestSettings/Deployment @runDeploymentRoot
//! ├── TestSettings/Execution/AgentRule/DataCollectors/.../CodeCoverageItem @binaryFile @pdbFile
//! ├── ResultSummary
//! │   ├── CollectorDataEntries/Collector/UriAttachments/UriAttachment/A @href
//! │   └── ResultFiles/ResultFile @path
//! ├── TestDefinitions/* @id @name @storage @priority
//! │   ├── Owners/Owner @name
//! │   └── TestMethod @className @name
//! └── Results
//!     ├── UnitTestResult | WebTestResult | TestResultAggregation
//!     │   ├── Output/{ErrorInfo/Message, ErrorInfo/StackTrace, StdOut, StdErr}
//!     │   ├── CollectorDataEntries/... and ResultFiles/...   (per execution id)
//!     │   └── InnerResults/(UnitTestResult | WebTestResult | TestResultAggregation)*
//!     └── ...
//! ```
//!
//! Attachment paths are resolved against `<document dir>/<deployment root>/In`.
//! Result-level attachments live in a sub-directory named after the result's
//! `executionId`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;

use super::time::{parse_duration, parse_timestamp};
use super::xml::{XmlElement, decode_document, parse_document};
use super::{ParseError, ParseResult, ParserOptions, ResultReader};
use crate::diagnostics::{DiagnosticSink, Warning};
use crate::model::{
    AttachmentSet, Identity, Outcome, ResultGroupType, ResultKind, ResultNode, Run, RunContext,
    TestCaseDefinition, TestResult, UNSPECIFIED_PRIORITY,
};

const COLLECTOR_ATTACHMENTS: &str = "CollectorDataEntries/Collector/UriAttachments/UriAttachment/A";
const RESULT_FILES: &str = "ResultFiles/ResultFile";
const CODE_COVERAGE_ITEMS: &str = "TestSettings/Execution/AgentRule/DataCollectors/DataCollector/Configuration/CodeCoverage/Regular/CodeCoverageItem";

/// Reader for `.trx` documents.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use testpub::diagnostics::TracingSink;
/// use testpub::model::RunContext;
/// use testpub::parser::{ParserOptions, ResultReader, TrxReader};
///
/// let reader = TrxReader::new(ParserOptions::default(), Arc::new(TracingSink));
/// let run = reader.read_results(Path::new("results.trx"), &RunContext::default())?;
/// println!("{} results", run.results.len());
/// # Ok::<(), testpub::parser::ParseError>(())
/// ```
pub struct TrxReader {
    options: ParserOptions,
    sink: Arc<dyn DiagnosticSink>,
    now: Option<DateTime<Utc>>,
}

/// Read-only state shared by the parallel result conversion.
struct Scope<'a> {
    definitions: &'a HashMap<String, TestCaseDefinition>,
    attachment_location: &'a Path,
    run_by: &'a Identity,
    now: DateTime<Utc>,
}

impl TrxReader {
    pub fn new(options: ParserOptions, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            options,
            sink,
            now: None,
        }
    }

    /// Pins the time used for missing or out-of-range result timestamps.
    ///
    /// Without a pinned time the current time is taken once per document.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Parses document `content` as if it had been read from `path`.
    ///
    /// `path` is only used for the attachment root and the run-level
    /// results-file attachment.
    pub fn read_str(&self, content: &str, path: &Path, context: &RunContext) -> ParseResult<Run> {
        let root = parse_document(content)?;
        if root.name != "TestRun" {
            return Err(ParseError::Malformed(format!(
                "expected <TestRun> root element, found <{}>",
                root.name
            )));
        }

        let mut run = Run::new(self.run_name(context), context);
        let (started, completed) = self.run_times(&root);
        run.started = started;
        run.completed = completed;

        let attachment_location = attachment_location(&root, path);
        self.sink.debug(&format!(
            "Attachment location: {}",
            attachment_location.display()
        ));

        run.attachments = self.run_attachments(&root, path, &attachment_location);

        let definitions = self.definitions(&root);
        let scope = Scope {
            definitions: &definitions,
            attachment_location: &attachment_location,
            run_by: &run.owner,
            now: self.now.unwrap_or_else(Utc::now),
        };

        let nodes: Vec<(&XmlElement, ResultKind)> = root
            .child("Results")
            .map(|results| result_nodes(results).collect())
            .unwrap_or_default();

        let results: Vec<TestResult> = nodes
            .par_iter()
            .map(|(node, kind)| self.convert_result(node, *kind, &scope))
            .collect();

        run.results = results
            .into_iter()
            .filter(TestResult::has_mandatory_fields)
            .collect();

        self.sink
            .debug(&format!("Total test results: {}", run.results.len()));
        Ok(run)
    }

    fn run_name(&self, context: &RunContext) -> String {
        if let Some(name) = context.run_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }

        let mut name = format!("{} Test Run", self.name());
        for token in [&context.configuration, &context.platform]
            .into_iter()
            .flatten()
            .filter(|t| !t.trim().is_empty())
        {
            name.push(' ');
            name.push_str(token);
        }
        name
    }

    /// Reads the run start/finish pair; either both are usable or neither is.
    fn run_times(&self, root: &XmlElement) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let Some(times) = root.child("Times") else {
            return (None, None);
        };
        let (Some(start), Some(finish)) = (times.attr("start"), times.attr("finish")) else {
            return (None, None);
        };

        let discard = |reason: String| {
            self.sink.warning(Warning::RunTimesDiscarded { reason });
            (None, None)
        };

        match (parse_timestamp(start), parse_timestamp(finish)) {
            (Some(start), Some(finish)) if finish >= start => {
                self.sink.debug("Setting run start and finish times.");
                (Some(start), Some(finish))
            }
            (Some(_), Some(_)) => discard("finish is earlier than start".to_string()),
            (None, _) => discard(format!("unparsable start '{}'", start)),
            (_, None) => discard(format!("unparsable finish '{}'", finish)),
        }
    }

    fn run_attachments(&self, root: &XmlElement, path: &Path, location: &Path) -> Vec<PathBuf> {
        let mut attachments = Vec::new();
        if self.options.include_results_file {
            attachments.push(path.to_path_buf());
        }

        let summary = root.child("ResultSummary");
        let collector_files = summary
            .into_iter()
            .flat_map(|s| s.select(COLLECTOR_ATTACHMENTS))
            .filter_map(|a| a.attr("href"))
            .map(|href| location.join(relative_path(href)));
        attachments.extend(collector_files);

        let result_files = summary
            .into_iter()
            .flat_map(|s| s.select(RESULT_FILES))
            .filter_map(|f| f.attr("path"))
            .map(|p| location.join(relative_path(p)));
        attachments.extend(result_files);

        let out_dir = location.join("..").join("Out");
        for item in root.select(CODE_COVERAGE_ITEMS) {
            for attribute in ["binaryFile", "pdbFile"] {
                if let Some(file) = item.attr(attribute).and_then(file_name_of) {
                    attachments.push(out_dir.join(file));
                }
            }
        }

        for attachment in &attachments {
            self.sink.debug(&format!(
                "Adding run level attachment: {}",
                attachment.display()
            ));
        }
        attachments
    }

    /// Builds the test-definition lookup keyed by test id.
    fn definitions(&self, root: &XmlElement) -> HashMap<String, TestCaseDefinition> {
        let mut definitions = HashMap::new();
        let Some(container) = root.child("TestDefinitions") else {
            return definitions;
        };

        for node in &container.children {
            let Some(id) = node.attr("id") else {
                self.sink
                    .debug(&format!("Skipping <{}> definition without id", node.name));
                continue;
            };

            let automated_test_name = match node.child("TestMethod") {
                Some(method) => match (method.attr("className"), method.attr("name")) {
                    (Some(class_name), Some(name)) => {
                        // className may carry an assembly qualification after a comma
                        let class_name = class_name.split(',').next().unwrap_or_default().trim();
                        Some(format!("{}.{}", class_name, name))
                    }
                    _ => node.attr("name").map(str::to_string),
                },
                None => node.attr("name").map(str::to_string),
            };

            let definition = TestCaseDefinition {
                automated_test_name,
                owner: node
                    .select_first("Owners/Owner")
                    .and_then(|owner| owner.attr("name"))
                    .map(Identity::with_alias),
                priority: node.attr("priority").map(str::to_string),
                storage: node
                    .attr("storage")
                    .and_then(file_name_of)
                    .map(str::to_string),
            };

            definitions.entry(id.to_string()).or_insert(definition);
        }
        definitions
    }

    fn convert_result(&self, node: &XmlElement, kind: ResultKind, scope: &Scope<'_>) -> TestResult {
        let label = node.attr("testName").unwrap_or("<unnamed>").to_string();
        let test_id = node.attr("testId");
        let definition = test_id.and_then(|id| scope.definitions.get(id));

        let priority = match definition.and_then(|d| d.priority.as_deref()) {
            None | Some("") => UNSPECIFIED_PRIORITY,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                self.sink.warning(Warning::MalformedAttribute {
                    test: label.clone(),
                    attribute: "priority",
                    value: value.to_string(),
                });
                UNSPECIFIED_PRIORITY
            }),
        };

        TestResult {
            automated_test_name: definition.and_then(|d| d.automated_test_name.clone()),
            automated_test_id: test_id.filter(|id| is_guid(id)).map(str::to_string),
            automated_test_type_id: node
                .attr("testType")
                .filter(|id| is_guid(id))
                .map(str::to_string),
            automated_test_storage: definition.and_then(|d| d.storage.clone()),
            kind,
            priority,
            owner: definition.and_then(|d| d.owner.clone()),
            run_by: scope.run_by.clone(),
            node: self.convert_node(node, kind, 0, &label, scope),
        }
    }

    /// Converts one result element sitting at `level` (0 = top level).
    ///
    /// Nested results are converted at `level + 1` while that level is within
    /// the depth limit; the fan-out cap is applied before converting them.
    fn convert_node(
        &self,
        node: &XmlElement,
        kind: ResultKind,
        level: usize,
        label: &str,
        scope: &Scope<'_>,
    ) -> ResultNode {
        let duration = match node.attr("duration") {
            Some(value) => parse_duration(value).unwrap_or_else(|| {
                self.malformed(label, "duration", value);
                Duration::ZERO
            }),
            None => Duration::ZERO,
        };

        let mut started = match node.attr("startTime") {
            Some(value) => parse_timestamp(value).unwrap_or_else(|| {
                self.malformed(label, "startTime", value);
                scope.now
            }),
            None => scope.now,
        };
        let span = TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero());
        let mut completed = started.checked_add_signed(span).unwrap_or(started);
        if started < self.options.min_valid_date || completed < self.options.min_valid_date {
            started = scope.now;
            completed = scope.now.checked_add_signed(span).unwrap_or(scope.now);
        }

        let outcome = Outcome::from_token(node.attr("outcome"));
        let mut result = ResultNode {
            title: node.attr("testName").map(str::to_string),
            outcome,
            duration,
            started,
            completed,
            computer_name: node.attr("computerName").map(str::to_string),
            error_message: None,
            stack_trace: None,
            attachments: AttachmentSet {
                files: result_attachments(node, scope.attachment_location),
                console_log: None,
                standard_error: None,
            },
            group_type: None,
            sub_results: Vec::new(),
        };

        if outcome == Outcome::Failed {
            let text = |path: &str| {
                node.select_first(path)
                    .map(XmlElement::inner_text)
                    .filter(|t| !t.trim().is_empty())
            };
            result.error_message = text("Output/ErrorInfo/Message");
            result.stack_trace = text("Output/ErrorInfo/StackTrace");
            result.attachments.console_log = text("Output/StdOut");
            result.attachments.standard_error = text("Output/StdErr");
        }

        if let Some(inner) = node.child("InnerResults") {
            result.group_type = Some(group_type(node, kind));

            let mut children: Vec<(&XmlElement, ResultKind)> = result_nodes(inner).collect();
            let limits = self.options.limits;
            if !children.is_empty() && !limits.allows_level(level + 1) {
                self.sink.warning(Warning::MaxHierarchyLevelReached {
                    test: label.to_string(),
                    max: limits.max_depth,
                });
                children.clear();
            }
            if children.len() > limits.max_per_level {
                self.sink.warning(Warning::MaxSubResultsPerLevel {
                    test: label.to_string(),
                    found: children.len(),
                    max: limits.max_per_level,
                });
                children.truncate(limits.max_per_level);
            }

            result.sub_results = children
                .into_iter()
                .map(|(child, child_kind)| {
                    self.convert_node(child, child_kind, level + 1, label, scope)
                })
                .collect();
        }

        result
    }

    fn malformed(&self, test: &str, attribute: &'static str, value: &str) {
        self.sink.warning(Warning::MalformedAttribute {
            test: test.to_string(),
            attribute,
            value: value.to_string(),
        });
    }
}

impl ResultReader for TrxReader {
    fn name(&self) -> &str {
        "VSTest"
    }

    fn read_results(&self, path: &Path, context: &RunContext) -> ParseResult<Run> {
        let bytes = std::fs::read(path)?;
        let content = decode_document(&bytes)?;
        self.read_str(&content, path, context)
    }
}

/// Result elements directly under `parent`, in document order.
fn result_nodes(parent: &XmlElement) -> impl Iterator<Item = (&XmlElement, ResultKind)> {
    parent.children.iter().filter_map(|child| {
        ResultKind::ALL
            .into_iter()
            .find(|kind| kind.element_name() == child.name)
            .map(|kind| (child, kind))
    })
}

fn group_type(node: &XmlElement, kind: ResultKind) -> ResultGroupType {
    match kind {
        ResultKind::OrderedTest => ResultGroupType::OrderedTest,
        ResultKind::UnitTest | ResultKind::WebTest => {
            if node.attr("resultType") == Some("DataDrivenTest") {
                ResultGroupType::DataDriven
            } else {
                ResultGroupType::Generic
            }
        }
    }
}

fn attachment_location(root: &XmlElement, path: &Path) -> PathBuf {
    let deployment_root = root
        .select_first("TestSettings/Deployment")
        .and_then(|d| d.attr("runDeploymentRoot"))
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    path.parent()
        .unwrap_or_else(|| Path::new(""))
        .join(relative_path(&deployment_root))
        .join("In")
}

fn result_attachments(node: &XmlElement, location: &Path) -> Vec<PathBuf> {
    let Some(execution_id) = node.attr("executionId") else {
        return Vec::new();
    };
    let dir = location.join(execution_id);

    let hrefs = node
        .select(COLLECTOR_ATTACHMENTS)
        .into_iter()
        .filter_map(|a| a.attr("href"));
    let files = node
        .select(RESULT_FILES)
        .into_iter()
        .filter_map(|f| f.attr("path"));

    hrefs
        .chain(files)
        .map(|p| dir.join(relative_path(p)))
        .collect()
}

/// Converts a document path that may use either separator.
fn relative_path(value: &str) -> PathBuf {
    value
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect()
}

/// Last component of a path that may use either separator.
fn file_name_of(value: &str) -> Option<&str> {
    value
        .rsplit(['\\', '/'])
        .next()
        .filter(|name| !name.is_empty())
}

fn is_guid(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}
