//! In-memory [`TestResultsService`] that records every call.
//!
//! Backs the `testpub publish` dry run and the publisher tests. Ids are
//! assigned from one counter; sub-result ids mirror the submitted tree.
//! Failures can be injected per operation.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::models::{
    AttachmentRequestModel, RemoteAttachment, RemoteResult, RemoteRun, RemoteSubResult,
    ResultCreateModel, RunCreateModel, RunUpdateModel, SubResultCreateModel,
};
use super::{ServiceError, ServiceResult, TestResultsService};

/// One recorded service call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum ServiceCall {
    CreateRun(RunCreateModel),
    AddResults {
        run_id: i32,
        results: Vec<ResultCreateModel>,
    },
    UpdateRun {
        run_id: i32,
        update: RunUpdateModel,
    },
    RunAttachment {
        run_id: i32,
        attachment: AttachmentRequestModel,
    },
    ResultAttachment {
        run_id: i32,
        result_id: i32,
        attachment: AttachmentRequestModel,
    },
    SubResultAttachment {
        run_id: i32,
        result_id: i32,
        sub_result_id: i32,
        attachment: AttachmentRequestModel,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: i32,
    calls: Vec<ServiceCall>,
    add_results_calls: usize,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn sub_result_ids(&mut self, subs: &[SubResultCreateModel]) -> Vec<RemoteSubResult> {
        subs.iter()
            .map(|sub| RemoteSubResult {
                id: self.next_id(),
                sub_results: self.sub_result_ids(&sub.sub_results),
            })
            .collect()
    }
}

/// Recording service with optional failure injection.
#[derive(Debug, Default)]
pub struct InMemoryService {
    state: Mutex<State>,
    base_url: Option<String>,
    fail_create_run: bool,
    fail_add_results_at: Option<usize>,
    fail_attachments: HashSet<String>,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `<base_url>/<run id>` as the run's web access url.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Makes `create_run` fail.
    pub fn with_create_run_failure(mut self) -> Self {
        self.fail_create_run = true;
        self
    }

    /// Makes the `index`-th (0-based) `add_results` call fail.
    pub fn with_add_results_failure(mut self, index: usize) -> Self {
        self.fail_add_results_at = Some(index);
        self
    }

    /// Makes every upload of an attachment named `file_name` fail.
    pub fn with_attachment_failure(mut self, file_name: impl Into<String>) -> Self {
        self.fail_attachments.insert(file_name.into());
        self
    }

    /// Snapshot of all calls recorded so far, in call order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Result counts of each `add_results` call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                ServiceCall::AddResults { results, .. } => Some(results.len()),
                _ => None,
            })
            .collect()
    }

    /// File names of every recorded attachment upload, at any level.
    pub fn attachment_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ServiceCall::RunAttachment { attachment, .. }
                | ServiceCall::ResultAttachment { attachment, .. }
                | ServiceCall::SubResultAttachment { attachment, .. } => {
                    Some(attachment.file_name)
                }
                _ => None,
            })
            .collect()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> ServiceResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ServiceError::Transport("service state poisoned".to_string()))?;
        Ok(f(&mut state))
    }

    fn remote_run(&self, id: i32, name: String, state: &str) -> RemoteRun {
        RemoteRun {
            id,
            name,
            state: state.to_string(),
            web_access_url: self
                .base_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), id)),
        }
    }

    fn check(&self, cancel: &CancellationToken) -> ServiceResult<()> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        Ok(())
    }

    fn record_attachment(
        &self,
        attachment: &AttachmentRequestModel,
        call: ServiceCall,
    ) -> ServiceResult<RemoteAttachment> {
        if self.fail_attachments.contains(&attachment.file_name) {
            return Err(ServiceError::Rejected {
                status: 500,
                message: format!("injected failure for {}", attachment.file_name),
            });
        }
        self.with_state(|state| {
            state.calls.push(call);
            RemoteAttachment {
                id: state.next_id(),
                url: None,
            }
        })
    }
}

#[async_trait]
impl TestResultsService for InMemoryService {
    async fn create_run(
        &self,
        run: &RunCreateModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteRun> {
        self.check(cancel)?;
        if self.fail_create_run {
            return Err(ServiceError::Transport("injected create_run failure".into()));
        }
        let id = self.with_state(|state| {
            state.calls.push(ServiceCall::CreateRun(run.clone()));
            state.next_id()
        })?;
        Ok(self.remote_run(id, run.name.clone(), &run.state))
    }

    async fn add_results(
        &self,
        run_id: i32,
        results: &[ResultCreateModel],
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<RemoteResult>> {
        self.check(cancel)?;
        let fail_at = self.fail_add_results_at;
        self.with_state(|state| {
            let index = state.add_results_calls;
            state.add_results_calls += 1;
            if fail_at == Some(index) {
                return Err(ServiceError::Rejected {
                    status: 400,
                    message: format!("injected failure for batch {}", index),
                });
            }

            state.calls.push(ServiceCall::AddResults {
                run_id,
                results: results.to_vec(),
            });
            Ok(results
                .iter()
                .map(|result| RemoteResult {
                    id: state.next_id(),
                    sub_results: state.sub_result_ids(&result.sub_results),
                })
                .collect())
        })?
    }

    async fn update_run(
        &self,
        run_id: i32,
        update: &RunUpdateModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteRun> {
        self.check(cancel)?;
        let name = self.with_state(|state| {
            state.calls.push(ServiceCall::UpdateRun {
                run_id,
                update: update.clone(),
            });
            state
                .calls
                .iter()
                .find_map(|call| match call {
                    ServiceCall::CreateRun(run) => Some(run.name.clone()),
                    _ => None,
                })
                .unwrap_or_default()
        })?;
        Ok(self.remote_run(run_id, name, &update.state))
    }

    async fn create_run_attachment(
        &self,
        run_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment> {
        self.check(cancel)?;
        self.record_attachment(
            attachment,
            ServiceCall::RunAttachment {
                run_id,
                attachment: attachment.clone(),
            },
        )
    }

    async fn create_result_attachment(
        &self,
        run_id: i32,
        result_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment> {
        self.check(cancel)?;
        self.record_attachment(
            attachment,
            ServiceCall::ResultAttachment {
                run_id,
                result_id,
                attachment: attachment.clone(),
            },
        )
    }

    async fn create_sub_result_attachment(
        &self,
        run_id: i32,
        result_id: i32,
        sub_result_id: i32,
        attachment: &AttachmentRequestModel,
        cancel: &CancellationToken,
    ) -> ServiceResult<RemoteAttachment> {
        self.check(cancel)?;
        self.record_attachment(
            attachment,
            ServiceCall::SubResultAttachment {
                run_id,
                result_id,
                sub_result_id,
                attachment: attachment.clone(),
            },
        )
    }
}
