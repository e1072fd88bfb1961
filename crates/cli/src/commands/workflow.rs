use clearway_core::config::LoadOptions;
use clearway_core::domain::workflow::{ApprovalWorkflow, SubjectId, WorkflowId, WorkflowMetadata};
use clearway_core::errors::ApplicationError;
use serde::Serialize;
use serde_json::Value;

use crate::commands::{with_service, CliWorkflowService, CommandResult};

/// Workflow plus the derived scheduling fields operators usually ask for.
#[derive(Debug, Serialize)]
struct WorkflowView {
    #[serde(flatten)]
    workflow: ApprovalWorkflow,
    current_role: Option<String>,
    current_step_deadline: Option<String>,
}

fn view(service: &CliWorkflowService, workflow: ApprovalWorkflow) -> WorkflowView {
    let (current_role, current_step_deadline) = if workflow.is_terminal() {
        (None, None)
    } else {
        (
            workflow.current_step().map(|step| step.role.clone()),
            service.current_step_deadline(&workflow).map(|deadline| deadline.to_rfc3339()),
        )
    };
    WorkflowView { workflow, current_role, current_step_deadline }
}

/// Parses `key=value` pairs; values that are valid JSON keep their type,
/// anything else is stored as a string.
pub fn parse_metadata(pairs: &[String]) -> Result<WorkflowMetadata, String> {
    let mut metadata = WorkflowMetadata::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(format!("metadata entry `{pair}` must look like key=value"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("metadata entry `{pair}` has an empty key"));
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

pub fn create(
    options: LoadOptions,
    subject_id: &str,
    workflow_type: &str,
    metadata: &[String],
) -> CommandResult {
    let metadata = match parse_metadata(metadata) {
        Ok(metadata) => metadata,
        Err(message) => return CommandResult::failure("create", "invalid_argument", message, 6),
    };

    with_service("create", options, |service| async move {
        match service
            .create_workflow_by_name(SubjectId(subject_id.to_string()), workflow_type, metadata)
            .await
        {
            Ok(workflow) => CommandResult::data("create", "workflow", view(&service, workflow)),
            Err(error) => {
                CommandResult::application_failure("create", error, service.correlation_id())
            }
        }
    })
}

pub fn approve(
    options: LoadOptions,
    workflow_id: &str,
    role: &str,
    approver_id: &str,
    comments: Option<String>,
) -> CommandResult {
    with_service("approve", options, |service| async move {
        match service
            .submit_approval(&WorkflowId(workflow_id.to_string()), role, approver_id, comments)
            .await
        {
            Ok(workflow) => CommandResult::data("approve", "workflow", view(&service, workflow)),
            Err(error) => {
                CommandResult::application_failure("approve", error, service.correlation_id())
            }
        }
    })
}

pub fn reject(
    options: LoadOptions,
    workflow_id: &str,
    role: &str,
    rejecter_id: &str,
    reason: &str,
) -> CommandResult {
    if reason.trim().is_empty() {
        return CommandResult::failure(
            "reject",
            "invalid_argument",
            "rejection reason is required",
            6,
        );
    }

    with_service("reject", options, |service| async move {
        match service
            .submit_rejection(&WorkflowId(workflow_id.to_string()), role, rejecter_id, reason)
            .await
        {
            Ok(workflow) => CommandResult::data("reject", "workflow", view(&service, workflow)),
            Err(error) => {
                CommandResult::application_failure("reject", error, service.correlation_id())
            }
        }
    })
}

pub fn show(options: LoadOptions, workflow_id: &str) -> CommandResult {
    with_service("show", options, |service| async move {
        let id = WorkflowId(workflow_id.to_string());
        match service.get_workflow(&id).await {
            Ok(Some(workflow)) => CommandResult::data("show", "workflow", view(&service, workflow)),
            Ok(None) => CommandResult::application_failure(
                "show",
                ApplicationError::NotFound(format!("workflow {id}")),
                service.correlation_id(),
            ),
            Err(error) => {
                CommandResult::application_failure("show", error, service.correlation_id())
            }
        }
    })
}

pub fn list(options: LoadOptions, subject_id: &str) -> CommandResult {
    with_service("list", options, |service| async move {
        match service.get_workflows_for_subject(&SubjectId(subject_id.to_string())).await {
            Ok(workflows) => {
                let views: Vec<_> = workflows.into_iter().map(|wf| view(&service, wf)).collect();
                CommandResult::data("list", "workflows", views)
            }
            Err(error) => {
                CommandResult::application_failure("list", error, service.correlation_id())
            }
        }
    })
}

pub fn pending(options: LoadOptions, role: &str) -> CommandResult {
    with_service("pending", options, |service| async move {
        match service.get_pending_workflows_for_role(role).await {
            Ok(workflows) => {
                let views: Vec<_> = workflows.into_iter().map(|wf| view(&service, wf)).collect();
                CommandResult::data("pending", "workflows", views)
            }
            Err(error) => {
                CommandResult::application_failure("pending", error, service.correlation_id())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_metadata;

    #[test]
    fn metadata_values_keep_json_types_and_fall_back_to_strings() {
        let metadata = parse_metadata(&[
            "amount=250000".to_string(),
            "jurisdiction=LU".to_string(),
            "flags=[\"pep\"]".to_string(),
        ])
        .expect("parse metadata");

        assert_eq!(metadata["amount"], json!(250000));
        assert_eq!(metadata["jurisdiction"], json!("LU"));
        assert_eq!(metadata["flags"], json!(["pep"]));
    }

    #[test]
    fn metadata_without_separator_is_rejected() {
        let error = parse_metadata(&["amount".to_string()]).expect_err("missing separator");
        assert!(error.contains("key=value"));
    }
}
