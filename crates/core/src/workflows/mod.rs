pub mod catalog;
pub mod machine;

pub use catalog::WorkflowTemplateCatalog;
pub use machine::{WorkflowError, WorkflowStateMachine};
