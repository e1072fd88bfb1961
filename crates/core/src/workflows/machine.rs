use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::workflow::{
    ApprovalRecord, ApprovalWorkflow, RejectionRecord, SubjectId, WorkflowId, WorkflowMetadata,
    WorkflowStatus, WorkflowType,
};
use crate::workflows::catalog::WorkflowTemplateCatalog;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("unknown workflow type `{name}`")]
    UnknownWorkflowType { name: String },
    #[error("workflow {workflow_id} is {status} and accepts no further transitions")]
    InvalidState { workflow_id: WorkflowId, status: WorkflowStatus },
    #[error("step {step} of workflow {workflow_id} requires role `{expected}`, got `{actual}`")]
    RoleMismatch { workflow_id: WorkflowId, step: u32, expected: String, actual: String },
}

/// Pure transition rules for approval workflows.
///
/// Every operation takes the current workflow by reference and returns the
/// next value; a failed transition leaves the caller's copy untouched. Each
/// successful transition bumps `version` by one so persistence can apply it
/// as a conditional update.
#[derive(Clone, Debug, Default)]
pub struct WorkflowStateMachine {
    catalog: WorkflowTemplateCatalog,
}

impl WorkflowStateMachine {
    pub fn new(catalog: WorkflowTemplateCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &WorkflowTemplateCatalog {
        &self.catalog
    }

    pub fn create(
        &self,
        subject_id: SubjectId,
        workflow_type: WorkflowType,
        metadata: WorkflowMetadata,
        now: DateTime<Utc>,
    ) -> ApprovalWorkflow {
        ApprovalWorkflow {
            id: WorkflowId(Uuid::new_v4().to_string()),
            subject_id,
            workflow_type,
            status: WorkflowStatus::Pending,
            current_step: 1,
            steps: self.catalog.template(workflow_type),
            approvals: Vec::new(),
            rejections: Vec::new(),
            metadata,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn create_by_name(
        &self,
        subject_id: SubjectId,
        workflow_type: &str,
        metadata: WorkflowMetadata,
        now: DateTime<Utc>,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        let workflow_type = self.catalog.resolve(workflow_type)?;
        Ok(self.create(subject_id, workflow_type, metadata, now))
    }

    pub fn submit_approval(
        &self,
        workflow: &ApprovalWorkflow,
        role: &str,
        approver_id: &str,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        let step = ensure_actionable(workflow, role)?;

        let mut next = workflow.clone();
        next.approvals.push(ApprovalRecord {
            step,
            role: role.to_string(),
            approved_by: approver_id.to_string(),
            approved_at: now,
            comments,
        });
        next.current_step = step + 1;
        next.status = if next.current_step as usize > next.steps.len() {
            WorkflowStatus::Approved
        } else {
            WorkflowStatus::InProgress
        };
        touch(&mut next, now);

        Ok(next)
    }

    /// A single rejection halts the workflow regardless of how many steps remain.
    pub fn submit_rejection(
        &self,
        workflow: &ApprovalWorkflow,
        role: &str,
        rejecter_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        let step = ensure_actionable(workflow, role)?;

        let mut next = workflow.clone();
        next.rejections.push(RejectionRecord {
            step,
            role: role.to_string(),
            rejected_by: rejecter_id.to_string(),
            rejected_at: now,
            reason: reason.to_string(),
        });
        next.status = WorkflowStatus::Rejected;
        touch(&mut next, now);

        Ok(next)
    }

    pub fn expire(
        &self,
        workflow: &ApprovalWorkflow,
        now: DateTime<Utc>,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        if workflow.is_terminal() {
            return Err(invalid_state(workflow));
        }

        let mut next = workflow.clone();
        next.status = WorkflowStatus::Expired;
        touch(&mut next, now);
        Ok(next)
    }

    /// True when `role` still has a step ahead of (or at) the current one.
    /// Status is not consulted; callers listing actionable work filter to
    /// active workflows first.
    pub fn requires_approval_from(&self, workflow: &ApprovalWorkflow, role: &str) -> bool {
        workflow.steps.iter().any(|step| step.order >= workflow.current_step && step.role == role)
    }

    /// Deadline for the current step, measured from the last transition.
    pub fn current_step_deadline(&self, workflow: &ApprovalWorkflow) -> Option<DateTime<Utc>> {
        let hours = workflow.current_step()?.timeout_hours?;
        Some(workflow.updated_at + Duration::hours(i64::from(hours)))
    }

    pub fn is_overdue(&self, workflow: &ApprovalWorkflow, now: DateTime<Utc>) -> bool {
        if workflow.is_terminal() {
            return false;
        }
        self.current_step_deadline(workflow).is_some_and(|deadline| now > deadline)
    }
}

fn ensure_actionable(workflow: &ApprovalWorkflow, role: &str) -> Result<u32, WorkflowError> {
    if workflow.is_terminal() {
        return Err(invalid_state(workflow));
    }

    let Some(step) = workflow.current_step() else {
        return Err(invalid_state(workflow));
    };

    if step.role != role {
        return Err(WorkflowError::RoleMismatch {
            workflow_id: workflow.id.clone(),
            step: workflow.current_step,
            expected: step.role.clone(),
            actual: role.to_string(),
        });
    }

    Ok(workflow.current_step)
}

fn invalid_state(workflow: &ApprovalWorkflow) -> WorkflowError {
    WorkflowError::InvalidState { workflow_id: workflow.id.clone(), status: workflow.status }
}

fn touch(workflow: &mut ApprovalWorkflow, now: DateTime<Utc>) {
    workflow.updated_at = now;
    workflow.version += 1;
}
