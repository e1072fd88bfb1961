use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use clearway_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use clearway_core::domain::workflow::{ApprovalWorkflow, WorkflowId};
use clearway_core::errors::ApplicationError;
use clearway_core::workflows::WorkflowStateMachine;
use clearway_db::WorkflowRepository;

const SWEEP_ACTOR: &str = "system:expiry_scanner";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub id: WorkflowId,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Non-terminal workflows examined.
    pub scanned: usize,
    pub expired: Vec<WorkflowId>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn expired_count(&self) -> usize {
        self.expired.len()
    }
}

/// Expires workflows whose current step has sat idle past its timeout.
///
/// Each overdue workflow is written with a version-checked update, so a
/// workflow that was approved or rejected after it was listed is left alone
/// and reported as a failure rather than overwritten.
pub struct ExpiryScanner<R, A> {
    repository: Arc<R>,
    machine: WorkflowStateMachine,
    audit_sink: A,
    correlation_id: String,
}

impl<R, A> ExpiryScanner<R, A>
where
    R: WorkflowRepository,
    A: AuditSink,
{
    pub fn new(
        repository: Arc<R>,
        machine: WorkflowStateMachine,
        audit_sink: A,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self { repository, machine, audit_sink, correlation_id: correlation_id.into() }
    }

    /// Runs one pass. Only a failure to list candidates aborts the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ApplicationError> {
        let now = now.trunc_subsecs(6);
        let candidates = self.repository.list_active().await?;
        let mut report = SweepReport { scanned: candidates.len(), ..SweepReport::default() };

        for workflow in candidates.iter().filter(|wf| self.machine.is_overdue(wf, now)) {
            match self.expire_one(workflow, now).await {
                Ok(()) => report.expired.push(workflow.id.clone()),
                Err(error) => {
                    self.record_failure(workflow, &error);
                    warn!(
                        event_name = "workflow.sweep.item_failed",
                        correlation_id = %self.correlation_id,
                        workflow_id = %workflow.id,
                        error_class = error.error_class(),
                        error = %error,
                        "could not expire overdue workflow"
                    );
                    report.failures.push(SweepFailure {
                        id: workflow.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            event_name = "workflow.sweep.completed",
            correlation_id = %self.correlation_id,
            scanned = report.scanned,
            expired = report.expired_count(),
            failed = report.failures.len(),
            "expiry sweep completed"
        );

        Ok(report)
    }

    async fn expire_one(
        &self,
        workflow: &ApprovalWorkflow,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let expired = self.machine.expire(workflow, now)?;
        self.repository.update(&expired, workflow.version).await?;

        self.audit_sink.emit(
            AuditEvent::new(
                Some(expired.id.clone()),
                Some(expired.subject_id.clone()),
                self.correlation_id.clone(),
                "workflow.expired",
                AuditCategory::Expiry,
                SWEEP_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("from", workflow.status.as_str())
            .with_metadata("step", workflow.current_step.to_string()),
        );
        debug!(
            event_name = "workflow.expired",
            correlation_id = %self.correlation_id,
            workflow_id = %expired.id,
            subject_id = %expired.subject_id,
            step = workflow.current_step,
            "workflow expired"
        );

        Ok(())
    }

    fn record_failure(&self, workflow: &ApprovalWorkflow, error: &ApplicationError) {
        self.audit_sink.emit(
            AuditEvent::new(
                Some(workflow.id.clone()),
                Some(workflow.subject_id.clone()),
                self.correlation_id.clone(),
                "workflow.expiry_failed",
                AuditCategory::Persistence,
                SWEEP_ACTOR,
                AuditOutcome::Failed,
            )
            .with_metadata("step", workflow.current_step.to_string())
            .with_metadata("error_class", error.error_class())
            .with_metadata("error", error.to_string()),
        );
    }

    /// Sweeps on every tick of `period` until `shutdown` flips to `true`.
    ///
    /// A failed pass is logged and the loop keeps going. Returns the number of
    /// workflows expired across all passes.
    pub async fn run_periodic(
        &self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut total_expired = 0;

        info!(
            event_name = "workflow.sweep.worker_started",
            correlation_id = %self.correlation_id,
            interval_secs = period.as_secs(),
            "expiry sweep worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) => total_expired += report.expired_count(),
                        Err(error) => error!(
                            event_name = "workflow.sweep.failed",
                            correlation_id = %self.correlation_id,
                            error_class = error.error_class(),
                            error = %error,
                            "expiry sweep failed"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(
                            event_name = "workflow.sweep.worker_stopping",
                            correlation_id = %self.correlation_id,
                            total_expired,
                            "expiry sweep worker shutting down"
                        );
                        break;
                    }
                }
            }
        }

        total_expired
    }
}
