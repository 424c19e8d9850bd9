//! Remote test-results service boundary.
//!
//! The publisher never talks to the network directly. Every remote operation
//! goes through the [`TestResultsService`] trait so the transport (HTTP
//! client, authentication, retries) stays outside this crate.
//!
//! # Call Sequence
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TestResultsService                       │
//! │                                                               │
//! │  create_run(RunCreateModel) ─────────────► RemoteRun { id }   │
//! │  add_results(run, [ResultCreateModel]) ──► [RemoteResult]     │
//! │      create_result_attachment(run, result, ..)                │
//! │      create_sub_result_attachment(run, result, sub, ..)       │
//! │  update_run(run, RunUpdateModel) ────────► RemoteRun          │
//! │  create_run_attachment(run, ..)                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `add_results` must return one [`RemoteResult`] per submitted result, in
//! submission order, each carrying remote ids for its sub-result tree in the
//! same shape as the submitted tree.
//!
//! # Implementations
//!
//! | Implementation | Module | Description |
//! |----------------|--------|-------------|
//! | In-memory | [`memory`] | Records calls and assigns ids; used for dry runs and tests |

pub mod memory;
pub mod models;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use memory::InMemoryService;
pub use models::{
    AttachmentRequestModel, RemoteAttachment, RemoteResult, RemoteRun, RemoteSubResult,
    ResultCreateModel, RunCreateModel, RunUpdateModel, SubResultCreateModel,
};

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by a [`TestResultsService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request did not reach the service or the connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with an error.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The cancellation token fired before the call completed.
    #[error("Request cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Asynchronous client for the remote test-management service.
///
/// All methods take the publish-wide [`CancellationToken`]; implementations
/// should return [`ServiceError::Cancelled`] once it fires.
#[async_trait]
pub trait TestResultsService: Send + Sync {
    /// Creates a run and returns its remote id.
    async fn create_run(
        &self,
        run: &RunCreateModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteRun>;

    /// Adds one batch of results to a run.
    async fn add_results(
        &self,
        run_id: i32,
        results: &[ResultCreateModel],
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<RemoteResult>>;

    /// Updates run state (used to mark the run completed).
    async fn update_run(
        &self,
        run_id: i32,
        update: &RunUpdateModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteRun>;

    async fn create_run_attachment(
        &self,
        run_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment>;

    async fn create_result_attachment(
        &self,
        run_id: i32,
        result_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment>;

    async fn create_sub_result_attachment(
        &self,
        run_id: i32,
        result_id: i32,
        sub_result_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment>;
}
