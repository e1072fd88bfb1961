use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    InvestorOnboarding,
    HighRiskInvestor,
    Redemption,
    LargeRedemption,
    TokenDeployment,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 5] = [
        Self::InvestorOnboarding,
        Self::HighRiskInvestor,
        Self::Redemption,
        Self::LargeRedemption,
        Self::TokenDeployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvestorOnboarding => "investor_onboarding",
            Self::HighRiskInvestor => "high_risk_investor",
            Self::Redemption => "redemption",
            Self::LargeRedemption => "large_redemption",
            Self::TokenDeployment => "token_deployment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "investor_onboarding" => Some(Self::InvestorOnboarding),
            "high_risk_investor" => Some(Self::HighRiskInvestor),
            "redemption" => Some(Self::Redemption),
            "large_redemption" => Some(Self::LargeRedemption),
            "token_deployment" => Some(Self::TokenDeployment),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Expired,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Approved, rejected and expired workflows accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub role: String,
    /// 1-based position in the workflow.
    pub order: u32,
    pub is_required: bool,
    pub timeout_hours: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub step: u32,
    pub role: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub step: u32,
    pub role: String,
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
}

pub type WorkflowMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub subject_id: SubjectId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub current_step: u32,
    pub steps: Vec<ApprovalStep>,
    pub approvals: Vec<ApprovalRecord>,
    pub rejections: Vec<RejectionRecord>,
    pub metadata: WorkflowMetadata,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    /// The step awaiting a decision, or `None` once every step has been approved.
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        let index = usize::try_from(self.current_step).ok()?.checked_sub(1)?;
        self.steps.get(index)
    }

    pub fn remaining_steps(&self) -> &[ApprovalStep] {
        let start = usize::try_from(self.current_step.saturating_sub(1)).unwrap_or(usize::MAX);
        self.steps.get(start..).unwrap_or(&[])
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
