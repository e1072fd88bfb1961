use clearway_core::domain::workflow::{ApprovalStep, WorkflowType};
use clearway_core::workflows::WorkflowTemplateCatalog;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct TemplateView {
    workflow_type: WorkflowType,
    steps: Vec<ApprovalStep>,
}

/// Lists every workflow type with its approval chain; needs no database.
pub fn run() -> CommandResult {
    let catalog = WorkflowTemplateCatalog::new();
    let templates: Vec<_> = catalog
        .workflow_types()
        .iter()
        .map(|workflow_type| TemplateView {
            workflow_type: *workflow_type,
            steps: catalog.template(*workflow_type),
        })
        .collect();

    CommandResult::data("templates", "templates", templates)
}
