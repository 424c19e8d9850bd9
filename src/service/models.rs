//! Wire models exchanged with the results service.
//!
//! Field names serialize in camelCase; enum-like values are sent as their
//! string names (`"Passed"`, `"Completed"`, `"DataDriven"`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    BuildReference, Identity, PipelineReference, ReleaseReference, ResultNode, Run, TestResult,
};

/// Run state names understood by the service.
pub const STATE_IN_PROGRESS: &str = "InProgress";
pub const STATE_COMPLETED: &str = "Completed";

/// Payload for `create_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCreateModel {
    pub name: String,
    pub is_automated: bool,
    pub state: String,
    pub start_date: Option<DateTime<Utc>>,
    pub complete_date: Option<DateTime<Utc>>,
    pub owner: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_reference: Option<PipelineReference>,
}

impl RunCreateModel {
    pub fn from_run(run: &Run) -> Self {
        Self {
            name: run.name.clone(),
            is_automated: true,
            state: STATE_IN_PROGRESS.to_string(),
            start_date: run.started,
            complete_date: run.completed,
            owner: run.owner.clone(),
            build: run.build.clone(),
            release: run.release.clone(),
            pipeline_reference: run.pipeline.clone(),
        }
    }
}

/// Payload for `update_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunUpdateModel {
    pub state: String,
    pub completed_date: Option<DateTime<Utc>>,
}

impl RunUpdateModel {
    /// Marks a run completed at `completed_date`.
    pub fn completed(completed_date: Option<DateTime<Utc>>) -> Self {
        Self {
            state: STATE_COMPLETED.to_string(),
            completed_date,
        }
    }
}

/// One result inside an `add_results` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCreateModel {
    pub test_case_title: String,
    pub automated_test_name: String,
    pub automated_test_storage: Option<String>,
    pub automated_test_id: Option<String>,
    pub automated_test_type_id: Option<String>,
    pub automated_test_type: String,
    pub priority: i32,
    pub owner: Option<Identity>,
    pub run_by: Identity,
    pub outcome: String,
    pub state: String,
    pub duration_in_ms: f64,
    pub started_date: DateTime<Utc>,
    pub completed_date: DateTime<Utc>,
    pub computer_name: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub result_group_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<SubResultCreateModel>,
}

impl From<&TestResult> for ResultCreateModel {
    fn from(result: &TestResult) -> Self {
        let node = &result.node;
        Self {
            test_case_title: node.title.clone().unwrap_or_default(),
            automated_test_name: result.automated_test_name.clone().unwrap_or_default(),
            automated_test_storage: result.automated_test_storage.clone(),
            automated_test_id: result.automated_test_id.clone(),
            automated_test_type_id: result.automated_test_type_id.clone(),
            automated_test_type: result.kind.as_str().to_string(),
            priority: result.priority,
            owner: result.owner.clone(),
            run_by: result.run_by.clone(),
            outcome: node.outcome.as_str().to_string(),
            state: STATE_COMPLETED.to_string(),
            duration_in_ms: duration_ms(node),
            started_date: node.started,
            completed_date: node.completed,
            computer_name: node.computer_name.clone(),
            error_message: node.error_message.clone(),
            stack_trace: node.stack_trace.clone(),
            result_group_type: node.group_type.map(|g| g.as_str().to_string()),
            sub_results: sub_result_models(&node.sub_results),
        }
    }
}

/// A nested result inside a [`ResultCreateModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubResultCreateModel {
    pub display_name: Option<String>,
    /// 1-based position among its siblings.
    pub sequence_id: i32,
    pub outcome: String,
    pub duration_in_ms: f64,
    pub started_date: DateTime<Utc>,
    pub completed_date: DateTime<Utc>,
    pub computer_name: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub result_group_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<SubResultCreateModel>,
}

fn sub_result_models(nodes: &[ResultNode]) -> Vec<SubResultCreateModel> {
    nodes
        .iter()
        .zip(1..)
        .map(|(node, sequence_id)| SubResultCreateModel {
            display_name: node.title.clone(),
            sequence_id,
            outcome: node.outcome.as_str().to_string(),
            duration_in_ms: duration_ms(node),
            started_date: node.started,
            completed_date: node.completed,
            computer_name: node.computer_name.clone(),
            error_message: node.error_message.clone(),
            stack_trace: node.stack_trace.clone(),
            result_group_type: node.group_type.map(|g| g.as_str().to_string()),
            sub_results: sub_result_models(&node.sub_results),
        })
        .collect()
}

fn duration_ms(node: &ResultNode) -> f64 {
    node.duration.as_secs_f64() * 1000.0
}

/// An upload-ready attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequestModel {
    /// Base64-encoded content.
    pub stream: String,
    pub file_name: String,
    pub comment: String,
    pub attachment_type: String,
}

/// A run as acknowledged by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRun {
    pub id: i32,
    pub name: String,
    pub state: String,
    pub web_access_url: Option<String>,
}

/// A created result and the ids of its sub-result tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResult {
    pub id: i32,
    #[serde(default)]
    pub sub_results: Vec<RemoteSubResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubResult {
    pub id: i32,
    #[serde(default)]
    pub sub_results: Vec<RemoteSubResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAttachment {
    pub id: i32,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AttachmentSet, Outcome, ResultGroupType, ResultKind, UNSPECIFIED_PRIORITY,
    };
    use chrono::TimeZone;
    use std::time::Duration;

    fn node(title: &str, duration: Duration) -> ResultNode {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        ResultNode {
            title: Some(title.to_string()),
            outcome: Outcome::Passed,
            duration,
            started,
            completed: started,
            computer_name: None,
            error_message: None,
            stack_trace: None,
            attachments: AttachmentSet::default(),
            group_type: None,
            sub_results: Vec::new(),
        }
    }

    #[test]
    fn test_result_model_from_result() {
        let mut parent = node("rows", Duration::from_millis(2500));
        parent.group_type = Some(ResultGroupType::DataDriven);
        parent.sub_results = vec![
            node("row 1", Duration::from_secs(1)),
            node("row 2", Duration::from_secs(1)),
        ];
        let result = TestResult {
            automated_test_name: Some("ns.Class.Rows".into()),
            automated_test_id: None,
            automated_test_type_id: None,
            automated_test_storage: Some("tests.dll".into()),
            kind: ResultKind::UnitTest,
            priority: UNSPECIFIED_PRIORITY,
            owner: None,
            run_by: Identity::new("ci"),
            node: parent,
        };

        let model = ResultCreateModel::from(&result);

        assert_eq!(model.test_case_title, "rows");
        assert_eq!(model.automated_test_type, "UnitTest");
        assert_eq!(model.outcome, "Passed");
        assert_eq!(model.state, "Completed");
        assert_eq!(model.duration_in_ms, 2500.0);
        assert_eq!(model.result_group_type.as_deref(), Some("DataDriven"));
        let sequence: Vec<_> = model.sub_results.iter().map(|s| s.sequence_id).collect();
        assert_eq!(sequence, vec![1, 2]);
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let update = RunUpdateModel::completed(None);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["state"], "Completed");
        assert!(json.get("completedDate").is_some());

        let remote: RemoteRun = serde_json::from_str(
            r#"{"id":3,"name":"r","state":"Completed","webAccessUrl":"https://host/runs/3"}"#,
        )
        .unwrap();
        assert_eq!(remote.web_access_url.as_deref(), Some("https://host/runs/3"));
    }
}
