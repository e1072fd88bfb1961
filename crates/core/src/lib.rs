pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflows;

pub use chrono;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::workflow::{
    ApprovalRecord, ApprovalStep, ApprovalWorkflow, RejectionRecord, SubjectId, WorkflowId,
    WorkflowMetadata, WorkflowStatus, WorkflowType,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflows::{WorkflowError, WorkflowStateMachine, WorkflowTemplateCatalog};
