use async_trait::async_trait;
use thiserror::Error;

use clearway_core::domain::workflow::{ApprovalWorkflow, SubjectId, WorkflowId};
use clearway_core::errors::ApplicationError;

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("workflow {id} is not at version {expected}")]
    VersionConflict { id: WorkflowId, expected: u32 },
    #[error("workflow {0} already exists")]
    Duplicate(WorkflowId),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict { .. } => Self::Conflict(value.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Storage for approval workflows.
///
/// `update` is conditional: it only writes when the stored row is still at
/// `expected_version`, and reports `VersionConflict` otherwise (including when
/// the row does not exist).
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn insert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &WorkflowId)
        -> Result<Option<ApprovalWorkflow>, RepositoryError>;

    /// Newest first.
    async fn list_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError>;

    /// Workflows in `pending` or `in_progress`, oldest first.
    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError>;

    async fn update(
        &self,
        workflow: &ApprovalWorkflow,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;
}
