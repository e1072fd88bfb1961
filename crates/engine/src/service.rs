use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use clearway_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use clearway_core::domain::workflow::{
    ApprovalWorkflow, SubjectId, WorkflowId, WorkflowMetadata, WorkflowType,
};
use clearway_core::errors::ApplicationError;
use clearway_core::workflows::{WorkflowError, WorkflowStateMachine, WorkflowTemplateCatalog};
use clearway_db::WorkflowRepository;

use crate::sweep::{ExpiryScanner, SweepReport};

/// Current time at the microsecond precision the SQL adapter stores, so a
/// returned workflow equals the row read back.
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Caller-facing entry point: loads a workflow, runs the transition through
/// the state machine, and writes the result back guarded by its version.
///
/// A write that loses a race surfaces as `ApplicationError::Conflict`; the
/// caller decides whether to reload and retry.
pub struct WorkflowService<R, A> {
    repository: Arc<R>,
    machine: WorkflowStateMachine,
    audit_sink: A,
    correlation_id: String,
}

impl<R, A> WorkflowService<R, A>
where
    R: WorkflowRepository,
    A: AuditSink + Clone,
{
    pub fn new(repository: Arc<R>, catalog: WorkflowTemplateCatalog, audit_sink: A) -> Self {
        Self {
            repository,
            machine: WorkflowStateMachine::new(catalog),
            audit_sink,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn catalog(&self) -> &WorkflowTemplateCatalog {
        self.machine.catalog()
    }

    pub async fn create_workflow(
        &self,
        subject_id: SubjectId,
        workflow_type: WorkflowType,
        metadata: WorkflowMetadata,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let workflow = self.machine.create(subject_id, workflow_type, metadata, stored_now());
        self.repository.insert(&workflow).await?;

        self.emit(&workflow, "workflow.created", "system", AuditOutcome::Success, |event| {
            event
                .with_metadata("workflow_type", workflow.workflow_type.as_str())
                .with_metadata("steps", workflow.steps.len().to_string())
        });
        info!(
            event_name = "workflow.created",
            correlation_id = %self.correlation_id,
            workflow_id = %workflow.id,
            subject_id = %workflow.subject_id,
            workflow_type = %workflow.workflow_type,
            "approval workflow created"
        );

        Ok(workflow)
    }

    /// Resolves `name` against the catalog; unknown names fail with
    /// `UnknownWorkflowType` and nothing is stored.
    pub async fn create_workflow_by_name(
        &self,
        subject_id: SubjectId,
        name: &str,
        metadata: WorkflowMetadata,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let workflow_type = match self.machine.catalog().resolve(name) {
            Ok(workflow_type) => workflow_type,
            Err(error) => {
                self.audit_sink.emit(
                    AuditEvent::new(
                        None,
                        Some(subject_id.clone()),
                        self.correlation_id.clone(),
                        "workflow.transition_rejected",
                        AuditCategory::Workflow,
                        "system",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("operation", "create")
                    .with_metadata("error", error.to_string()),
                );
                warn!(
                    event_name = "workflow.transition_rejected",
                    correlation_id = %self.correlation_id,
                    subject_id = %subject_id,
                    error = %error,
                    "workflow creation rejected"
                );
                return Err(error.into());
            }
        };

        self.create_workflow(subject_id, workflow_type, metadata).await
    }

    pub async fn submit_approval(
        &self,
        id: &WorkflowId,
        role: &str,
        approver_id: &str,
        comments: Option<String>,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let current = self.load(id).await?;
        let next = self
            .machine
            .submit_approval(&current, role, approver_id, comments, stored_now())
            .map_err(|error| self.transition_rejected(&current, "approve", approver_id, error))?;
        self.repository.update(&next, current.version).await?;

        self.emit(&next, "workflow.approval_recorded", approver_id, AuditOutcome::Success, |e| {
            e.with_metadata("role", role)
                .with_metadata("step", current.current_step.to_string())
                .with_metadata("from", current.status.as_str())
                .with_metadata("to", next.status.as_str())
        });
        info!(
            event_name = "workflow.approval_recorded",
            correlation_id = %self.correlation_id,
            workflow_id = %next.id,
            subject_id = %next.subject_id,
            role,
            approver_id,
            step = current.current_step,
            status = %next.status,
            "approval recorded"
        );

        Ok(next)
    }

    pub async fn submit_rejection(
        &self,
        id: &WorkflowId,
        role: &str,
        rejecter_id: &str,
        reason: &str,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let current = self.load(id).await?;
        let next = self
            .machine
            .submit_rejection(&current, role, rejecter_id, reason, stored_now())
            .map_err(|error| self.transition_rejected(&current, "reject", rejecter_id, error))?;
        self.repository.update(&next, current.version).await?;

        let step = current.current_step.to_string();
        self.emit(&next, "workflow.rejection_recorded", rejecter_id, AuditOutcome::Success, |e| {
            e.with_metadata("role", role).with_metadata("step", step).with_metadata("reason", reason)
        });
        info!(
            event_name = "workflow.rejection_recorded",
            correlation_id = %self.correlation_id,
            workflow_id = %next.id,
            subject_id = %next.subject_id,
            role,
            rejecter_id,
            step = current.current_step,
            "rejection recorded"
        );

        Ok(next)
    }

    pub async fn get_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, ApplicationError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    /// Newest first.
    pub async fn get_workflows_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, ApplicationError> {
        Ok(self.repository.list_for_subject(subject_id).await?)
    }

    /// Active workflows that still need `role` at the current or a later step, oldest first.
    pub async fn get_pending_workflows_for_role(
        &self,
        role: &str,
    ) -> Result<Vec<ApprovalWorkflow>, ApplicationError> {
        let active = self.repository.list_active().await?;
        Ok(active.into_iter().filter(|wf| self.machine.requires_approval_from(wf, role)).collect())
    }

    pub async fn sweep_expired_workflows(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ApplicationError> {
        self.scanner().sweep(now).await
    }

    pub fn requires_approval_from(&self, workflow: &ApprovalWorkflow, role: &str) -> bool {
        self.machine.requires_approval_from(workflow, role)
    }

    pub fn current_step_deadline(&self, workflow: &ApprovalWorkflow) -> Option<DateTime<Utc>> {
        self.machine.current_step_deadline(workflow)
    }

    pub fn scanner(&self) -> ExpiryScanner<R, A> {
        ExpiryScanner::new(
            Arc::clone(&self.repository),
            self.machine.clone(),
            self.audit_sink.clone(),
            self.correlation_id.clone(),
        )
    }

    async fn load(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("workflow {id}")))
    }

    fn transition_rejected(
        &self,
        workflow: &ApprovalWorkflow,
        operation: &str,
        actor: &str,
        error: WorkflowError,
    ) -> ApplicationError {
        let error = ApplicationError::from(error);
        self.emit(workflow, "workflow.transition_rejected", actor, AuditOutcome::Rejected, |e| {
            e.with_metadata("operation", operation)
                .with_metadata("error_class", error.error_class())
                .with_metadata("error", error.to_string())
        });
        warn!(
            event_name = "workflow.transition_rejected",
            correlation_id = %self.correlation_id,
            workflow_id = %workflow.id,
            subject_id = %workflow.subject_id,
            operation,
            actor,
            error_class = error.error_class(),
            error = %error,
            "workflow transition rejected"
        );
        error
    }

    fn emit(
        &self,
        workflow: &ApprovalWorkflow,
        event_type: &str,
        actor: &str,
        outcome: AuditOutcome,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let event = AuditEvent::new(
            Some(workflow.id.clone()),
            Some(workflow.subject_id.clone()),
            self.correlation_id.clone(),
            event_type,
            AuditCategory::Workflow,
            actor,
            outcome,
        );
        self.audit_sink.emit(decorate(event));
    }
}
