use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use clearway_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink};
use clearway_core::domain::workflow::{
    ApprovalWorkflow, SubjectId, WorkflowId, WorkflowMetadata, WorkflowStatus, WorkflowType,
};
use clearway_core::errors::{ApplicationError, DomainError};
use clearway_core::workflows::{WorkflowError, WorkflowStateMachine, WorkflowTemplateCatalog};
use clearway_db::{
    connect_with_settings, migrations, InMemoryWorkflowRepository, RepositoryError,
    SqlWorkflowRepository, WorkflowRepository,
};
use clearway_engine::WorkflowService;

type MemoryService = WorkflowService<InMemoryWorkflowRepository, InMemoryAuditSink>;

fn service_with_sink() -> (MemoryService, Arc<InMemoryWorkflowRepository>, InMemoryAuditSink) {
    let repository = Arc::new(InMemoryWorkflowRepository::default());
    let sink = InMemoryAuditSink::default();
    let service =
        WorkflowService::new(repository.clone(), WorkflowTemplateCatalog::new(), sink.clone())
            .with_correlation_id("req-lifecycle");
    (service, repository, sink)
}

fn subject(id: &str) -> SubjectId {
    SubjectId(id.to_string())
}

/// Stored workflow whose first step times out after four hours and was last
/// touched `idle_hours` ago.
async fn insert_idle_workflow(
    repository: &impl WorkflowRepository,
    subject_id: &str,
    idle_hours: i64,
) -> ApprovalWorkflow {
    let mut workflow = WorkflowStateMachine::default().create(
        subject(subject_id),
        WorkflowType::InvestorOnboarding,
        WorkflowMetadata::new(),
        Utc::now() - Duration::hours(idle_hours),
    );
    workflow.steps[0].timeout_hours = Some(4);
    repository.insert(&workflow).await.expect("insert idle workflow");
    workflow
}

#[tokio::test]
async fn high_risk_investor_is_halted_by_a_single_rejection() {
    let (service, repository, sink) = service_with_sink();
    let mut metadata = WorkflowMetadata::new();
    metadata.insert("risk_score".to_string(), json!(87));

    let created = service
        .create_workflow(subject("inv_1"), WorkflowType::HighRiskInvestor, metadata)
        .await
        .expect("create");
    assert_eq!(created.status, WorkflowStatus::Pending);
    assert_eq!(created.current_step, 1);

    let after_co = service
        .submit_approval(&created.id, "compliance_officer", "user_co", None)
        .await
        .expect("compliance officer approves");
    assert_eq!(after_co.status, WorkflowStatus::InProgress);
    assert_eq!(after_co.current_step, 2);

    service
        .submit_approval(&created.id, "risk_manager", "user_rm", Some("limits ok".to_string()))
        .await
        .expect("risk manager approves");

    let rejected = service
        .submit_rejection(
            &created.id,
            "compliance_director",
            "user_cd",
            "insufficient documentation",
        )
        .await
        .expect("compliance director rejects");

    assert_eq!(rejected.status, WorkflowStatus::Rejected);
    assert_eq!(rejected.approvals.len(), 2);
    assert_eq!(rejected.rejections.len(), 1);
    assert_eq!(rejected.rejections[0].reason, "insufficient documentation");
    assert_eq!(rejected.version, 4);

    let stored = repository.find_by_id(&created.id).await.expect("find").expect("exists");
    assert_eq!(stored, rejected);
    assert_eq!(
        sink.event_types(),
        vec![
            "workflow.created".to_string(),
            "workflow.approval_recorded".to_string(),
            "workflow.approval_recorded".to_string(),
            "workflow.rejection_recorded".to_string(),
        ]
    );
    assert!(sink.events().iter().all(|event| event.correlation_id == "req-lifecycle"));
}

#[tokio::test]
async fn completing_every_step_approves_the_workflow() {
    let (service, _, _) = service_with_sink();
    let created = service
        .create_workflow(subject("inv_2"), WorkflowType::Redemption, WorkflowMetadata::new())
        .await
        .expect("create");

    service
        .submit_approval(&created.id, "operations_manager", "user_ops", None)
        .await
        .expect("ops approves");
    let approved = service
        .submit_approval(&created.id, "compliance_officer", "user_co", None)
        .await
        .expect("compliance approves");

    assert_eq!(approved.status, WorkflowStatus::Approved);
    assert_eq!(approved.current_step, 3);
    assert!(!service.requires_approval_from(&approved, "compliance_officer"));
}

#[tokio::test]
async fn returned_workflows_match_rows_read_back_from_sqlite() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    let repository = Arc::new(SqlWorkflowRepository::new(pool));
    let service = WorkflowService::new(
        repository.clone(),
        WorkflowTemplateCatalog::new(),
        InMemoryAuditSink::default(),
    );

    let created = service
        .create_workflow(subject("inv_18"), WorkflowType::HighRiskInvestor, WorkflowMetadata::new())
        .await
        .expect("create");
    assert_eq!(repository.find_by_id(&created.id).await.expect("find"), Some(created.clone()));

    let approved = service
        .submit_approval(&created.id, "compliance_officer", "user_co", Some("ok".to_string()))
        .await
        .expect("approve");
    assert_eq!(repository.find_by_id(&created.id).await.expect("find"), Some(approved));

    let rejected = service
        .submit_rejection(&created.id, "risk_manager", "user_rm", "exposure too high")
        .await
        .expect("reject");
    assert_eq!(repository.find_by_id(&created.id).await.expect("find"), Some(rejected));
}

#[tokio::test]
async fn wrong_role_is_rejected_and_stored_workflow_is_untouched() {
    let (service, repository, sink) = service_with_sink();
    let created = service
        .create_workflow(subject("inv_3"), WorkflowType::HighRiskInvestor, WorkflowMetadata::new())
        .await
        .expect("create");

    let error = service
        .submit_approval(&created.id, "risk_manager", "user_rm", None)
        .await
        .expect_err("risk manager is not the current approver");

    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::Workflow(WorkflowError::RoleMismatch { step: 1, .. }))
    ));
    let stored = repository.find_by_id(&created.id).await.expect("find").expect("exists");
    assert_eq!(stored, created);
    assert_eq!(sink.event_types().last().map(String::as_str), Some("workflow.transition_rejected"));
}

#[tokio::test]
async fn terminal_workflows_refuse_further_submissions() {
    let (service, repository, _) = service_with_sink();
    let created = service
        .create_workflow(subject("inv_4"), WorkflowType::InvestorOnboarding, WorkflowMetadata::new())
        .await
        .expect("create");
    service
        .submit_rejection(&created.id, "compliance_officer", "user_co", "sanctions hit")
        .await
        .expect("reject");

    let error = service
        .submit_approval(&created.id, "compliance_officer", "user_co", None)
        .await
        .expect_err("rejected workflows are final");

    assert_eq!(error.error_class(), "invalid_state");
    let stored = repository.find_by_id(&created.id).await.expect("find").expect("exists");
    assert_eq!(stored.status, WorkflowStatus::Rejected);
    assert!(stored.approvals.is_empty());
    assert!(service.requires_approval_from(&stored, "compliance_officer"));
    assert!(service
        .get_pending_workflows_for_role("compliance_officer")
        .await
        .expect("pending")
        .is_empty());
}

/// Both submission kinds fail with `invalid_state` and the stored row is unchanged.
async fn assert_submissions_refused(
    service: &MemoryService,
    repository: &InMemoryWorkflowRepository,
    id: &WorkflowId,
    role: &str,
) {
    let before = repository.find_by_id(id).await.expect("find").expect("exists");

    let approval =
        service.submit_approval(id, role, "user_late", None).await.expect_err("approval refused");
    let rejection = service
        .submit_rejection(id, role, "user_late", "too late")
        .await
        .expect_err("rejection refused");

    assert_eq!(approval.error_class(), "invalid_state");
    assert_eq!(rejection.error_class(), "invalid_state");
    let after = repository.find_by_id(id).await.expect("find").expect("exists");
    assert_eq!(after, before);
}

#[tokio::test]
async fn approved_workflows_are_final() {
    let (service, repository, _) = service_with_sink();
    let created = service
        .create_workflow(subject("inv_16"), WorkflowType::InvestorOnboarding, WorkflowMetadata::new())
        .await
        .expect("create");
    let approved = service
        .submit_approval(&created.id, "compliance_officer", "user_co", None)
        .await
        .expect("approve");
    assert_eq!(approved.status, WorkflowStatus::Approved);

    assert_submissions_refused(&service, &repository, &created.id, "compliance_officer").await;
}

#[tokio::test]
async fn expired_workflows_are_final() {
    let (service, repository, _) = service_with_sink();
    let idle = insert_idle_workflow(repository.as_ref(), "inv_17", 9).await;
    let report = service.sweep_expired_workflows(Utc::now()).await.expect("sweep");
    assert_eq!(report.expired, vec![idle.id.clone()]);

    assert_submissions_refused(&service, &repository, &idle.id, "compliance_officer").await;

    let stored = repository.find_by_id(&idle.id).await.expect("find").expect("exists");
    assert_eq!(stored.status, WorkflowStatus::Expired);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn unknown_ids_and_types_are_reported() {
    let (service, repository, _) = service_with_sink();

    let missing = service
        .submit_approval(&WorkflowId("missing".to_string()), "compliance_officer", "u", None)
        .await
        .expect_err("missing workflow");
    assert!(matches!(missing, ApplicationError::NotFound(_)));

    let unknown = service
        .create_workflow_by_name(subject("inv_5"), "kyc_refresh", WorkflowMetadata::new())
        .await
        .expect_err("unknown workflow type");
    assert_eq!(unknown.error_class(), "unknown_workflow_type");
    assert!(repository.list_for_subject(&subject("inv_5")).await.expect("list").is_empty());

    let by_name = service
        .create_workflow_by_name(subject("inv_5"), "Large_Redemption", WorkflowMetadata::new())
        .await
        .expect("known name resolves");
    assert_eq!(by_name.workflow_type, WorkflowType::LargeRedemption);
    assert!(service.get_workflow(&by_name.id).await.expect("get").is_some());
}

#[tokio::test]
async fn pending_for_role_covers_current_and_later_steps() {
    let (service, _, _) = service_with_sink();
    let onboarding = service
        .create_workflow(subject("inv_6"), WorkflowType::InvestorOnboarding, WorkflowMetadata::new())
        .await
        .expect("create onboarding");
    let high_risk = service
        .create_workflow(subject("inv_7"), WorkflowType::HighRiskInvestor, WorkflowMetadata::new())
        .await
        .expect("create high risk");
    let redemption = service
        .create_workflow(subject("inv_8"), WorkflowType::Redemption, WorkflowMetadata::new())
        .await
        .expect("create redemption");
    service
        .submit_approval(&onboarding.id, "compliance_officer", "user_co", None)
        .await
        .expect("approve onboarding");

    let for_compliance =
        service.get_pending_workflows_for_role("compliance_officer").await.expect("pending");
    let ids: HashSet<_> = for_compliance.iter().map(|wf| wf.id.clone()).collect();
    assert_eq!(ids, HashSet::from([high_risk.id.clone(), redemption.id.clone()]));

    let for_risk = service.get_pending_workflows_for_role("risk_manager").await.expect("pending");
    assert_eq!(for_risk.len(), 1);
    assert_eq!(for_risk[0].id, high_risk.id);

    assert!(service.get_pending_workflows_for_role("auditor").await.expect("pending").is_empty());
}

#[tokio::test]
async fn workflows_for_subject_are_listed_newest_first() {
    let (service, repository, _) = service_with_sink();
    let older = WorkflowStateMachine::default().create(
        subject("inv_9"),
        WorkflowType::Redemption,
        WorkflowMetadata::new(),
        Utc::now() - Duration::days(2),
    );
    repository.insert(&older).await.expect("insert older");
    let newer = service
        .create_workflow(subject("inv_9"), WorkflowType::LargeRedemption, WorkflowMetadata::new())
        .await
        .expect("create newer");

    let listed = service.get_workflows_for_subject(&subject("inv_9")).await.expect("list");

    let ids: Vec<_> = listed.into_iter().map(|wf| wf.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn sweep_expires_four_hour_step_idle_for_five_hours_only() {
    let (service, repository, sink) = service_with_sink();
    let stale = insert_idle_workflow(repository.as_ref(), "inv_10", 5).await;
    let fresh = insert_idle_workflow(repository.as_ref(), "inv_11", 3).await;

    let report = service.sweep_expired_workflows(Utc::now()).await.expect("sweep");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired_count(), 1);
    assert_eq!(report.expired, vec![stale.id.clone()]);
    let stale_after = repository.find_by_id(&stale.id).await.expect("find").expect("exists");
    let fresh_after = repository.find_by_id(&fresh.id).await.expect("find").expect("exists");
    assert_eq!(stale_after.status, WorkflowStatus::Expired);
    assert_eq!(fresh_after.status, WorkflowStatus::Pending);
    assert_eq!(sink.event_types(), vec!["workflow.expired".to_string()]);

    let second = service.sweep_expired_workflows(Utc::now()).await.expect("second sweep");
    assert_eq!(second.scanned, 1);
    assert_eq!(second.expired_count(), 0);
}

#[tokio::test]
async fn steps_without_timeout_never_expire() {
    let (service, repository, _) = service_with_sink();
    let mut workflow = WorkflowStateMachine::default().create(
        subject("inv_12"),
        WorkflowType::TokenDeployment,
        WorkflowMetadata::new(),
        Utc::now() - Duration::days(365),
    );
    assert_eq!(workflow.steps[0].timeout_hours, None);
    workflow.metadata.insert("chain".to_string(), json!("polygon"));
    repository.insert(&workflow).await.expect("insert");

    let report = service.sweep_expired_workflows(Utc::now()).await.expect("sweep");

    assert_eq!(report.scanned, 1);
    assert!(report.expired.is_empty());
}

/// Returns the workflow as it looked when captured, regardless of later writes.
struct StaleReadRepository {
    inner: Arc<InMemoryWorkflowRepository>,
    snapshot: ApprovalWorkflow,
}

#[async_trait::async_trait]
impl WorkflowRepository for StaleReadRepository {
    async fn insert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        self.inner.insert(workflow).await
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        if *id == self.snapshot.id {
            return Ok(Some(self.snapshot.clone()));
        }
        self.inner.find_by_id(id).await
    }

    async fn list_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        self.inner.list_for_subject(subject_id).await
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        self.inner.list_active().await
    }

    async fn update(
        &self,
        workflow: &ApprovalWorkflow,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        self.inner.update(workflow, expected_version).await
    }
}

#[tokio::test]
async fn concurrent_writer_surfaces_conflict_instead_of_lost_update() {
    let (service, repository, _) = service_with_sink();
    let created = service
        .create_workflow(subject("inv_13"), WorkflowType::InvestorOnboarding, WorkflowMetadata::new())
        .await
        .expect("create");
    let racing = WorkflowService::new(
        Arc::new(StaleReadRepository { inner: repository.clone(), snapshot: created.clone() }),
        WorkflowTemplateCatalog::new(),
        InMemoryAuditSink::default(),
    );

    service
        .submit_approval(&created.id, "compliance_officer", "user_co", None)
        .await
        .expect("first writer wins");
    let error = racing
        .submit_rejection(&created.id, "compliance_officer", "user_co2", "duplicate account")
        .await
        .expect_err("second writer read a stale version");

    assert!(matches!(error, ApplicationError::Conflict(_)));
    let stored = repository.find_by_id(&created.id).await.expect("find").expect("exists");
    assert_eq!(stored.status, WorkflowStatus::Approved);
    assert!(stored.rejections.is_empty());
    assert_eq!(stored.version, 2);
}

/// Fails writes for chosen ids, or every listing when `fail_listing` is set.
struct FlakyRepository {
    inner: Arc<InMemoryWorkflowRepository>,
    failing_updates: HashSet<WorkflowId>,
    fail_listing: bool,
}

#[async_trait::async_trait]
impl WorkflowRepository for FlakyRepository {
    async fn insert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        self.inner.insert(workflow).await
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        self.inner.list_for_subject(subject_id).await
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        if self.fail_listing {
            return Err(RepositoryError::Decode("simulated listing failure".to_string()));
        }
        self.inner.list_active().await
    }

    async fn update(
        &self,
        workflow: &ApprovalWorkflow,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        if self.failing_updates.contains(&workflow.id) {
            return Err(RepositoryError::Decode("simulated write failure".to_string()));
        }
        self.inner.update(workflow, expected_version).await
    }
}

#[tokio::test]
async fn sweep_continues_past_a_failed_write() {
    let inner = Arc::new(InMemoryWorkflowRepository::default());
    let broken = insert_idle_workflow(inner.as_ref(), "inv_14", 6).await;
    let healthy = insert_idle_workflow(inner.as_ref(), "inv_15", 7).await;
    let sink = InMemoryAuditSink::default();
    let service = WorkflowService::new(
        Arc::new(FlakyRepository {
            inner: inner.clone(),
            failing_updates: HashSet::from([broken.id.clone()]),
            fail_listing: false,
        }),
        WorkflowTemplateCatalog::new(),
        sink.clone(),
    );

    let report = service.sweep_expired_workflows(Utc::now()).await.expect("sweep");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, vec![healthy.id.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, broken.id);
    assert!(report.failures[0].error.contains("simulated write failure"));
    let broken_after = inner.find_by_id(&broken.id).await.expect("find").expect("exists");
    assert_eq!(broken_after.status, WorkflowStatus::Pending);

    let failed: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|event| event.event_type == "workflow.expiry_failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].workflow_id.as_ref(), Some(&broken.id));
    assert_eq!(failed[0].category, AuditCategory::Persistence);
    assert_eq!(failed[0].outcome, AuditOutcome::Failed);
    assert_eq!(failed[0].metadata.get("error_class").map(String::as_str), Some("persistence"));
}

#[tokio::test]
async fn sweep_fails_when_candidates_cannot_be_listed() {
    let service = WorkflowService::new(
        Arc::new(FlakyRepository {
            inner: Arc::new(InMemoryWorkflowRepository::default()),
            failing_updates: HashSet::new(),
            fail_listing: true,
        }),
        WorkflowTemplateCatalog::new(),
        InMemoryAuditSink::default(),
    );

    let error = service.sweep_expired_workflows(Utc::now()).await.expect_err("listing fails");

    assert!(matches!(error, ApplicationError::Persistence(ref message) if message.contains("listing")));
}
