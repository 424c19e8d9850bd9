//! Canonical, format-agnostic model of a test run.
//!
//! Every document format is converted into these types before anything is
//! published. A [`Run`] owns a flat list of top-level [`TestResult`]s; each
//! result may carry a bounded tree of [`SubResult`]s (see
//! [`crate::limits::HierarchyLimits`]).
//!
//! ```text
//! Run
//! ├── attachments: Vec<PathBuf>          (run level)
//! └── results: Vec<TestResult>
//!     ├── automated test metadata        (name, id, priority, storage, owner)
//!     └── node: ResultNode
//!         ├── title, outcome, timing, diagnostics
//!         ├── attachments: AttachmentSet
//!         └── sub_results: Vec<SubResult>   (recursive, depth-capped)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority value used when a test definition does not specify one.
pub const UNSPECIFIED_PRIORITY: i32 = 255;

/// Outcome of one result or sub-result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Passed,
    Failed,
    Inconclusive,
    NotExecuted,
}

impl Outcome {
    /// Maps an outcome token from a result document.
    ///
    /// A missing token or `failed` maps to [`Outcome::Failed`]; `passed` and
    /// `inconclusive` map to themselves; anything else is
    /// [`Outcome::NotExecuted`]. Matching is case-insensitive.
    ///
    /// ```
    /// use testpub::model::Outcome;
    ///
    /// assert_eq!(Outcome::from_token(Some("Passed")), Outcome::Passed);
    /// assert_eq!(Outcome::from_token(None), Outcome::Failed);
    /// assert_eq!(Outcome::from_token(Some("Timeout")), Outcome::NotExecuted);
    /// ```
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            None => Outcome::Failed,
            Some(t) if t.eq_ignore_ascii_case("failed") => Outcome::Failed,
            Some(t) if t.eq_ignore_ascii_case("passed") => Outcome::Passed,
            Some(t) if t.eq_ignore_ascii_case("inconclusive") => Outcome::Inconclusive,
            Some(_) => Outcome::NotExecuted,
        }
    }

    /// Wire name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "Passed",
            Outcome::Failed => "Failed",
            Outcome::Inconclusive => "Inconclusive",
            Outcome::NotExecuted => "NotExecuted",
        }
    }
}

/// Kind of result node in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    UnitTest,
    WebTest,
    OrderedTest,
}

impl ResultKind {
    /// All kinds, in the order they are read from a document.
    pub const ALL: [ResultKind; 3] = [
        ResultKind::UnitTest,
        ResultKind::WebTest,
        ResultKind::OrderedTest,
    ];

    /// Element name used for this kind in TRX documents.
    pub fn element_name(&self) -> &'static str {
        match self {
            ResultKind::UnitTest => "UnitTestResult",
            ResultKind::WebTest => "WebTestResult",
            ResultKind::OrderedTest => "TestResultAggregation",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::UnitTest => "UnitTest",
            ResultKind::WebTest => "WebTest",
            ResultKind::OrderedTest => "OrderedTest",
        }
    }
}

/// How the sub-results of a node relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultGroupType {
    Generic,
    DataDriven,
    OrderedTest,
}

impl ResultGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultGroupType::Generic => "Generic",
            ResultGroupType::DataDriven => "DataDriven",
            ResultGroupType::OrderedTest => "OrderedTest",
        }
    }
}

/// An identity reference (run owner, test owner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: String,
    pub directory_alias: Option<String>,
}

impl Identity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            directory_alias: None,
        }
    }

    /// Identity whose alias equals its display name (test owners).
    pub fn with_alias(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            directory_alias: Some(name.clone()),
            display_name: name,
        }
    }
}

/// Files and inline logs attached to a result or sub-result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    /// Candidate attachment files, not yet validated.
    pub files: Vec<PathBuf>,

    /// Captured standard output (failed results only).
    pub console_log: Option<String>,

    /// Captured standard error (failed results only).
    pub standard_error: Option<String>,
}

impl AttachmentSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.console_log.is_none() && self.standard_error.is_none()
    }
}

/// Data shared by top-level results and sub-results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    /// Display title (`testName` in TRX). Mandatory for top-level results.
    pub title: Option<String>,

    pub outcome: Outcome,

    pub duration: Duration,

    pub started: DateTime<Utc>,

    pub completed: DateTime<Utc>,

    pub computer_name: Option<String>,

    /// Only populated when `outcome` is [`Outcome::Failed`].
    pub error_message: Option<String>,

    /// Only populated when `outcome` is [`Outcome::Failed`].
    pub stack_trace: Option<String>,

    pub attachments: AttachmentSet,

    /// Set when the node has nested results.
    pub group_type: Option<ResultGroupType>,

    pub sub_results: Vec<SubResult>,
}

/// A nested outcome beneath a [`TestResult`] or another sub-result.
///
/// Sub-results inherit the automated test identity of their parent, so they
/// are plain [`ResultNode`]s.
pub type SubResult = ResultNode;

/// Outcome of one automated test case within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Fully qualified automated test name. Mandatory.
    pub automated_test_name: Option<String>,

    /// Test identifier, kept only when it is a well-formed GUID.
    pub automated_test_id: Option<String>,

    /// Test type identifier, kept only when it is a well-formed GUID.
    pub automated_test_type_id: Option<String>,

    pub automated_test_storage: Option<String>,

    pub kind: ResultKind,

    pub priority: i32,

    pub owner: Option<Identity>,

    pub run_by: Identity,

    pub node: ResultNode,
}

impl TestResult {
    /// Returns `true` when both mandatory fields are present and non-empty.
    pub fn has_mandatory_fields(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.automated_test_name) && present(&self.node.title)
    }

    pub fn is_failed(&self) -> bool {
        self.node.outcome == Outcome::Failed
    }

    /// Name used in diagnostics.
    pub fn display_name(&self) -> &str {
        self.automated_test_name
            .as_deref()
            .or(self.node.title.as_deref())
            .unwrap_or("<unnamed>")
    }
}

/// Lookup entry built from a test definition node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestCaseDefinition {
    pub automated_test_name: Option<String>,
    pub owner: Option<Identity>,
    pub priority: Option<String>,
    pub storage: Option<String>,
}

/// Pipeline coordinates of the job that produced the results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineReference {
    pub pipeline_id: i64,
    pub stage_name: Option<String>,
    pub stage_attempt: u32,
    pub phase_name: Option<String>,
    pub phase_attempt: u32,
    pub job_name: Option<String>,
    pub job_attempt: u32,
}

/// Values supplied by the host for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunContext {
    pub owner: Option<String>,
    pub platform: Option<String>,
    pub configuration: Option<String>,
    pub build_id: i64,
    pub build_uri: Option<String>,
    pub release_uri: Option<String>,
    pub release_environment_uri: Option<String>,
    pub run_name: Option<String>,
    pub target_branch: Option<String>,
    pub pipeline: Option<PipelineReference>,
}

/// Build correlation for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReference {
    pub id: i64,
    pub uri: Option<String>,
    pub flavor: Option<String>,
    pub platform: Option<String>,
    pub target_branch: Option<String>,
}

/// Release correlation for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReference {
    pub uri: String,
    pub environment_uri: Option<String>,
}

/// Lifecycle of a run as far as this process knows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Parsed, not yet created remotely.
    #[default]
    NotStarted,
    /// Created remotely, results being published.
    InProgress,
    /// The service acknowledged the run as completed.
    Completed,
    /// A structural failure stopped publication.
    Incomplete,
}

/// One test-execution session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Assigned by the remote service after creation.
    pub id: Option<i32>,

    pub name: String,

    /// `None` when the document does not give a usable range.
    pub started: Option<DateTime<Utc>>,

    pub completed: Option<DateTime<Utc>>,

    pub owner: Identity,

    pub build: Option<BuildReference>,

    pub release: Option<ReleaseReference>,

    pub pipeline: Option<PipelineReference>,

    /// Run-level attachment candidates, in discovery order.
    pub attachments: Vec<PathBuf>,

    pub results: Vec<TestResult>,

    pub state: RunState,
}

impl Run {
    /// Creates an empty run carrying the correlation data of `context`.
    pub fn new(name: impl Into<String>, context: &RunContext) -> Self {
        let build = (context.build_id != 0 || context.build_uri.is_some()).then(|| BuildReference {
            id: context.build_id,
            uri: context.build_uri.clone(),
            flavor: context.configuration.clone(),
            platform: context.platform.clone(),
            target_branch: context.target_branch.clone(),
        });
        let release = context
            .release_uri
            .as_ref()
            .filter(|uri| !uri.trim().is_empty())
            .map(|uri| ReleaseReference {
                uri: uri.clone(),
                environment_uri: context.release_environment_uri.clone(),
            });

        Self {
            id: None,
            name: name.into(),
            started: None,
            completed: None,
            owner: Identity::new(context.owner.clone().unwrap_or_default()),
            build,
            release,
            pipeline: context.pipeline.clone(),
            attachments: Vec::new(),
            results: Vec::new(),
            state: RunState::NotStarted,
        }
    }

    /// Returns `true` if any result failed.
    pub fn has_failed_results(&self) -> bool {
        self.results.iter().any(TestResult::is_failed)
    }

    /// Number of results with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results
            .iter()
            .filter(|r| r.node.outcome == outcome)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(title: Option<&str>, outcome: Outcome) -> ResultNode {
        let now = Utc::now();
        ResultNode {
            title: title.map(str::to_string),
            outcome,
            duration: Duration::ZERO,
            started: now,
            completed: now,
            computer_name: None,
            error_message: None,
            stack_trace: None,
            attachments: AttachmentSet::default(),
            group_type: None,
            sub_results: Vec::new(),
        }
    }

    fn result(name: Option<&str>, title: Option<&str>) -> TestResult {
        TestResult {
            automated_test_name: name.map(str::to_string),
            automated_test_id: None,
            automated_test_type_id: None,
            automated_test_storage: None,
            kind: ResultKind::UnitTest,
            priority: UNSPECIFIED_PRIORITY,
            owner: None,
            run_by: Identity::default(),
            node: node(title, Outcome::Passed),
        }
    }

    #[test]
    fn test_outcome_tokens() {
        assert_eq!(Outcome::from_token(Some("FAILED")), Outcome::Failed);
        assert_eq!(Outcome::from_token(Some("passed")), Outcome::Passed);
        assert_eq!(Outcome::from_token(Some("Inconclusive")), Outcome::Inconclusive);
        assert_eq!(Outcome::from_token(Some("NotExecuted")), Outcome::NotExecuted);
        assert_eq!(Outcome::from_token(Some("Aborted")), Outcome::NotExecuted);
        assert_eq!(Outcome::from_token(None), Outcome::Failed);
    }

    #[test]
    fn test_mandatory_fields() {
        assert!(result(Some("ns.Class.Method"), Some("Method")).has_mandatory_fields());
        assert!(!result(None, Some("Method")).has_mandatory_fields());
        assert!(!result(Some("ns.Class.Method"), None).has_mandatory_fields());
        assert!(!result(Some(""), Some("Method")).has_mandatory_fields());
    }

    #[test]
    fn test_run_new_release_only_when_uri_present() {
        let context = RunContext {
            owner: Some("alice".into()),
            build_id: 12,
            configuration: Some("Release".into()),
            platform: Some("x64".into()),
            release_uri: Some("   ".into()),
            release_environment_uri: Some("vstfs:///env/1".into()),
            ..Default::default()
        };
        let run = Run::new("run", &context);

        assert_eq!(run.owner.display_name, "alice");
        assert!(run.release.is_none());
        let build = run.build.unwrap();
        assert_eq!(build.id, 12);
        assert_eq!(build.flavor.as_deref(), Some("Release"));
        assert_eq!(build.platform.as_deref(), Some("x64"));
    }

    #[test]
    fn test_run_has_failed_results() {
        let mut run = Run::new("run", &RunContext::default());
        run.results.push(result(Some("a"), Some("a")));
        assert!(!run.has_failed_results());

        let mut failed = result(Some("b"), Some("b"));
        failed.node.outcome = Outcome::Failed;
        run.results.push(failed);
        assert!(run.has_failed_results());
        assert_eq!(run.count(Outcome::Passed), 1);
        assert_eq!(run.count(Outcome::Failed), 1);
    }
}
