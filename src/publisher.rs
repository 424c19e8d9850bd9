//! Batched publication of a parsed run.
//!
//! # Publish Flow
//!
//! ```text
//!   Run (parsed)
//!       │
//!       │ create_run ─────────────────────────► run id
//!       ▼
//!   results.chunks(batch_size)          (sequential, source order)
//!       │
//!       ├─ HierarchyLimits::enforce      (re-validate each batch)
//!       ├─ add_results ─────────────────────► [RemoteResult]
//!       └─ per result, in order:
//!            files ──join_all──► create_result_attachment
//!            stdout, stderr ───► create_result_attachment
//!            sub-result tree ──► create_sub_result_attachment
//!       │
//!       │ update_run(Completed)
//!       ▼
//!   run attachments
//!       ├─ Archive:    zip ─────► create_run_attachment
//!       │              (on failure: fall through to Individual)
//!       └─ Individual: files ──join_all──► create_run_attachment
//! ```
//!
//! Run creation, batch upload and completion failures abort the publish and
//! leave the run [`RunState::Incomplete`]. Attachment failures are warnings.
//!
//! Cancellation is observed before every batch and before every individual
//! attachment upload. Batches already acknowledged stay published.

use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::attachment::{
    self, AttachmentLimits, AttachmentResolver, CONSOLE_LOG_FILE_NAME, STANDARD_ERROR_FILE_NAME,
    archive,
};
use crate::diagnostics::{DiagnosticSink, Warning};
use crate::limits::HierarchyLimits;
use crate::model::{AttachmentSet, ResultNode, Run, RunState, TestResult};
use crate::service::{
    AttachmentRequestModel, RemoteResult, RemoteSubResult, ResultCreateModel, RunCreateModel,
    RunUpdateModel, ServiceError, ServiceResult, TestResultsService,
};

/// Default number of results per `add_results` call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Structural failures that stop a publish.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to create test run: {0}")]
    CreateRun(#[source] ServiceError),

    #[error("Failed to publish results batch {batch} of run {run_id}: {source}")]
    AddResults {
        run_id: i32,
        batch: usize,
        #[source]
        source: ServiceError,
    },

    #[error("Failed to complete test run {run_id}: {source}")]
    UpdateRun {
        run_id: i32,
        #[source]
        source: ServiceError,
    },

    #[error("Publishing cancelled")]
    Cancelled,

    /// The service did not return one result per submitted result.
    #[error("Service returned {returned} results for a batch of {sent}")]
    ResultCountMismatch { sent: usize, returned: usize },
}

/// How run-level attachments are uploaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentMode {
    /// One upload per file.
    #[default]
    Individual,
    /// One compressed archive holding all files.
    Archive,
}

/// Knobs for [`BatchPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub batch_size: usize,
    pub attachment_mode: AttachmentMode,
    pub publish_run_attachments: bool,
    pub limits: HierarchyLimits,
    pub attachment_limits: AttachmentLimits,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            attachment_mode: AttachmentMode::default(),
            publish_run_attachments: true,
            limits: HierarchyLimits::default(),
            attachment_limits: AttachmentLimits::default(),
        }
    }
}

/// What a successful publish did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub run_id: i32,
    pub results_published: usize,
    pub batches: usize,
    /// Any published result has outcome Failed.
    pub had_failed_results: bool,
    pub attachments_uploaded: usize,
    /// Missing, unreadable or oversized attachments.
    pub attachments_skipped: usize,
    /// Attachments the service rejected.
    pub attachments_failed: usize,
    pub web_access_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    uploaded: usize,
    skipped: usize,
    failed: usize,
}

impl Tally {
    fn uploaded() -> Self {
        Self {
            uploaded: 1,
            ..Self::default()
        }
    }

    fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    fn failed() -> Self {
        Self {
            failed: 1,
            ..Self::default()
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Where an attachment is uploaded to.
#[derive(Debug, Clone, Copy)]
enum Target {
    Run,
    Result { result_id: i32 },
    SubResult { result_id: i32, sub_result_id: i32 },
}

/// Publishes runs through a [`TestResultsService`].
pub struct BatchPublisher<S> {
    service: S,
    options: PublishOptions,
    resolver: AttachmentResolver,
    sink: Arc<dyn DiagnosticSink>,
}

impl<S: TestResultsService> BatchPublisher<S> {
    pub fn new(service: S, options: PublishOptions, sink: Arc<dyn DiagnosticSink>) -> Self {
        let resolver = AttachmentResolver::new(options.attachment_limits, Arc::clone(&sink));
        Self {
            service,
            options,
            resolver,
            sink,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Publishes `run`, assigning its remote id and final state.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot be created, a batch is rejected,
    /// completion fails or `cancel` fires. The run is then left
    /// [`RunState::Incomplete`].
    pub async fn publish(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> PublishResult<PublishOutcome> {
        let outcome = self.publish_run(run, cancel).await;
        if outcome.is_err() {
            run.state = RunState::Incomplete;
        }
        outcome
    }

    async fn publish_run(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> PublishResult<PublishOutcome> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let remote = self
            .service
            .create_run(&RunCreateModel::from_run(run), cancel)
            .await
            .map_err(|e| cancelled_or(e, PublishError::CreateRun))?;
        let run_id = remote.id;
        run.id = Some(run_id);
        run.state = RunState::InProgress;
        info!("Created test run {} ({})", run_id, run.name);

        let mut outcome = PublishOutcome {
            run_id,
            ..PublishOutcome::default()
        };
        let mut tally = Tally::default();
        let batch_size = self.options.batch_size.max(1);
        let total = run.results.len();

        for (batch, chunk) in run.results.chunks_mut(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            info!(
                "Publishing test results: {} results remaining",
                total - outcome.results_published
            );

            for result in chunk.iter_mut() {
                let name = result.display_name().to_string();
                self.options
                    .limits
                    .enforce(&name, &mut result.node.sub_results, 1, self.sink.as_ref());
            }

            let models: Vec<ResultCreateModel> = chunk.iter().map(ResultCreateModel::from).collect();
            let created = self
                .service
                .add_results(run_id, &models, cancel)
                .await
                .map_err(|source| {
                    cancelled_or(source, |source| PublishError::AddResults {
                        run_id,
                        batch,
                        source,
                    })
                })?;
            if created.len() != chunk.len() {
                return Err(PublishError::ResultCountMismatch {
                    sent: chunk.len(),
                    returned: created.len(),
                });
            }

            for (result, remote) in chunk.iter().zip(&created) {
                tally += self
                    .upload_result_attachments(run_id, result, remote, cancel)
                    .await;
            }
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }

            outcome.batches += 1;
            outcome.results_published += chunk.len();
        }

        let completed = self
            .service
            .update_run(run_id, &RunUpdateModel::completed(run.completed), cancel)
            .await
            .map_err(|source| {
                cancelled_or(source, |source| PublishError::UpdateRun { run_id, source })
            })?;
        run.state = RunState::Completed;
        if let Some(url) = &completed.web_access_url {
            info!("Published test run: {}", url);
        }
        outcome.web_access_url = completed.web_access_url;

        if self.options.publish_run_attachments {
            tally += self.upload_run_attachments(run_id, &run.attachments, cancel).await;
        }

        outcome.had_failed_results = run.has_failed_results();
        outcome.attachments_uploaded = tally.uploaded;
        outcome.attachments_skipped = tally.skipped;
        outcome.attachments_failed = tally.failed;
        Ok(outcome)
    }

    /// Uploads a result's own attachments, then those of its sub-results.
    async fn upload_result_attachments(
        &self,
        run_id: i32,
        result: &TestResult,
        remote: &RemoteResult,
        cancel: &CancellationToken,
    ) -> Tally {
        let result_id = remote.id;
        let mut tally = self
            .upload_set(run_id, Target::Result { result_id }, &result.node.attachments, cancel)
            .await;

        // (node, remote sub-result, level) with level 1 = direct children
        let mut pending: Vec<(&ResultNode, i32, usize)> = Vec::new();
        let mut stack: Vec<(&[ResultNode], &[RemoteSubResult], usize)> = vec![(
            result.node.sub_results.as_slice(),
            remote.sub_results.as_slice(),
            1,
        )];
        while let Some((nodes, remotes, level)) = stack.pop() {
            if !self.options.limits.allows_level(level) {
                continue;
            }
            for (node, remote_sub) in nodes.iter().zip(remotes) {
                pending.push((node, remote_sub.id, level));
                stack.push((
                    node.sub_results.as_slice(),
                    remote_sub.sub_results.as_slice(),
                    level + 1,
                ));
            }
        }

        for (node, sub_result_id, level) in pending {
            debug!(
                "Uploading attachments of sub-result {} at level {}",
                sub_result_id, level
            );
            tally += self
                .upload_set(
                    run_id,
                    Target::SubResult {
                        result_id,
                        sub_result_id,
                    },
                    &node.attachments,
                    cancel,
                )
                .await;
        }
        tally
    }

    /// Uploads deduplicated files concurrently, then console and error text.
    async fn upload_set(
        &self,
        run_id: i32,
        target: Target,
        set: &AttachmentSet,
        cancel: &CancellationToken,
    ) -> Tally {
        let mut tally = self
            .upload_files(run_id, target, &attachment::unique_paths(&set.files), cancel)
            .await;

        let texts = [
            (set.console_log.as_deref(), CONSOLE_LOG_FILE_NAME),
            (set.standard_error.as_deref(), STANDARD_ERROR_FILE_NAME),
        ];
        for (text, file_name) in texts {
            let Some(text) = text else { continue };
            if cancel.is_cancelled() {
                break;
            }
            tally += match self.resolver.resolve_text(text, file_name) {
                Some(request) => self.deliver(run_id, target, &request, cancel).await,
                None => Tally::skipped(),
            };
        }
        tally
    }

    async fn upload_files(
        &self,
        run_id: i32,
        target: Target,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Tally {
        let uploads = files.iter().map(|path| async move {
            if cancel.is_cancelled() {
                return Tally::default();
            }
            match self.resolver.resolve_file(path).await {
                Some(request) => self.deliver(run_id, target, &request, cancel).await,
                None => Tally::skipped(),
            }
        });

        let mut tally = Tally::default();
        for result in join_all(uploads).await {
            tally += result;
        }
        tally
    }

    async fn upload_run_attachments(
        &self,
        run_id: i32,
        attachments: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Tally {
        let files = attachment::unique_paths(attachments);
        if files.is_empty() {
            return Tally::default();
        }

        if self.options.attachment_mode == AttachmentMode::Archive {
            match self.upload_archive(run_id, &files, cancel).await {
                Ok(()) => return Tally::uploaded(),
                Err(reason) => self.sink.warning(Warning::ArchiveFailed { reason }),
            }
        }

        debug!("Uploading {} run attachments individually", files.len());
        self.upload_files(run_id, Target::Run, &files, cancel).await
    }

    /// Archives `files` and uploads the archive as one run attachment.
    async fn upload_archive(
        &self,
        run_id: i32,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let owned = files.to_vec();
        let archive = tokio::task::spawn_blocking(move || archive::create_archive(run_id, &owned))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

        let request = self
            .resolver
            .resolve_file(archive.path())
            .await
            .ok_or_else(|| format!("archive {} is not uploadable", display_name(archive.path())))?;

        self.send(run_id, Target::Run, &request, cancel)
            .await
            .map_err(|e| e.to_string())?;
        debug!("Uploaded run attachments as {}", request.file_name);
        Ok(())
    }

    /// Sends one request, turning a failure into a warning.
    async fn deliver(
        &self,
        run_id: i32,
        target: Target,
        request: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> Tally {
        match self.send(run_id, target, request, cancel).await {
            Ok(()) => Tally::uploaded(),
            Err(e) => {
                self.sink.warning(Warning::AttachmentUploadFailed {
                    name: request.file_name.clone(),
                    reason: e.to_string(),
                });
                Tally::failed()
            }
        }
    }

    async fn send(
        &self,
        run_id: i32,
        target: Target,
        request: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        match target {
            Target::Run => {
                self.service
                    .create_run_attachment(run_id, request, cancel)
                    .await?
            }
            Target::Result { result_id } => {
                self.service
                    .create_result_attachment(run_id, result_id, request, cancel)
                    .await?
            }
            Target::SubResult {
                result_id,
                sub_result_id,
            } => {
                self.service
                    .create_sub_result_attachment(run_id, result_id, sub_result_id, request, cancel)
                    .await?
            }
        };
        Ok(())
    }
}

fn cancelled_or(error: ServiceError, wrap: impl FnOnce(ServiceError) -> PublishError) -> PublishError {
    match error {
        ServiceError::Cancelled => PublishError::Cancelled,
        other => wrap(other),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
