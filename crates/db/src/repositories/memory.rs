use std::collections::HashMap;

use tokio::sync::RwLock;

use clearway_core::domain::workflow::{ApprovalWorkflow, SubjectId, WorkflowId};

use super::{RepositoryError, WorkflowRepository};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, ApprovalWorkflow>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id.0) {
            return Err(RepositoryError::Duplicate(workflow.id.clone()));
        }
        workflows.insert(workflow.id.0.clone(), workflow.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn list_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut matching: Vec<_> =
            workflows.values().filter(|wf| wf.subject_id == *subject_id).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
        Ok(matching)
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut active: Vec<_> = workflows.values().filter(|wf| !wf.is_terminal()).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(active)
    }

    async fn update(
        &self,
        workflow: &ApprovalWorkflow,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        match workflows.get_mut(&workflow.id.0) {
            Some(stored) if stored.version == expected_version => {
                *stored = workflow.clone();
                Ok(())
            }
            _ => Err(RepositoryError::VersionConflict {
                id: workflow.id.clone(),
                expected: expected_version,
            }),
        }
    }
}
