use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::Row;

use clearway_core::domain::workflow::{
    ApprovalWorkflow, SubjectId, WorkflowId, WorkflowStatus, WorkflowType,
};

use super::{RepositoryError, WorkflowRepository};
use crate::DbPool;

const WORKFLOW_COLUMNS: &str = "id, subject_id, workflow_type, status, current_step, steps_json,
     approvals_json, rejections_json, metadata_json, version, created_at, updated_at";

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Fixed-width UTC timestamps so `ORDER BY created_at` sorts chronologically.
fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn encode_json<T: Serialize + ?Sized>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn decode_json<T: DeserializeOwned>(column: &str, value: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn decode_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {value} is out of range")))
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let get_str = |column: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(column).map_err(|e| RepositoryError::Decode(e.to_string()))
    };
    let get_i64 = |column: &str| -> Result<i64, RepositoryError> {
        row.try_get::<i64, _>(column).map_err(|e| RepositoryError::Decode(e.to_string()))
    };

    let workflow_type_str = get_str("workflow_type")?;
    let workflow_type = WorkflowType::parse(&workflow_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown workflow type `{workflow_type_str}`"))
    })?;
    let status_str = get_str("status")?;
    let status = WorkflowStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_str}`")))?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(get_str("id")?),
        subject_id: SubjectId(get_str("subject_id")?),
        workflow_type,
        status,
        current_step: decode_u32("current_step", get_i64("current_step")?)?,
        steps: decode_json("steps_json", &get_str("steps_json")?)?,
        approvals: decode_json("approvals_json", &get_str("approvals_json")?)?,
        rejections: decode_json("rejections_json", &get_str("rejections_json")?)?,
        metadata: decode_json("metadata_json", &get_str("metadata_json")?)?,
        version: decode_u32("version", get_i64("version")?)?,
        created_at: decode_timestamp("created_at", &get_str("created_at")?)?,
        updated_at: decode_timestamp("updated_at", &get_str("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn insert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO approval_workflow (id, subject_id, workflow_type, status, current_step,
                                            steps_json, approvals_json, rejections_json,
                                            metadata_json, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.subject_id.0)
        .bind(workflow.workflow_type.as_str())
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.current_step))
        .bind(encode_json("steps_json", &workflow.steps)?)
        .bind(encode_json("approvals_json", &workflow.approvals)?)
        .bind(encode_json("rejections_json", &workflow.rejections)?)
        .bind(encode_json("metadata_json", &workflow.metadata)?)
        .bind(i64::from(workflow.version))
        .bind(encode_timestamp(&workflow.created_at))
        .bind(encode_timestamp(&workflow.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(RepositoryError::Duplicate(workflow.id.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_workflow(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow
             WHERE subject_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(&subject_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_workflow).collect::<Result<Vec<_>, _>>()
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow
             WHERE status IN ('pending', 'in_progress')
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_workflow).collect::<Result<Vec<_>, _>>()
    }

    async fn update(
        &self,
        workflow: &ApprovalWorkflow,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_workflow SET
                 status = ?,
                 current_step = ?,
                 steps_json = ?,
                 approvals_json = ?,
                 rejections_json = ?,
                 metadata_json = ?,
                 version = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.current_step))
        .bind(encode_json("steps_json", &workflow.steps)?)
        .bind(encode_json("approvals_json", &workflow.approvals)?)
        .bind(encode_json("rejections_json", &workflow.rejections)?)
        .bind(encode_json("metadata_json", &workflow.metadata)?)
        .bind(i64::from(workflow.version))
        .bind(encode_timestamp(&workflow.updated_at))
        .bind(&workflow.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                id: workflow.id.clone(),
                expected: expected_version,
            });
        }

        Ok(())
    }
}
