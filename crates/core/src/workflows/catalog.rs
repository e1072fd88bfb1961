use crate::domain::workflow::{ApprovalStep, WorkflowType};
use crate::workflows::machine::WorkflowError;

/// Role sequences for every registered workflow type.
///
/// The table is static; steps are cloned into each workflow at creation so
/// later catalog changes never rewrite an in-flight approval chain.
#[derive(Clone, Debug, Default)]
pub struct WorkflowTemplateCatalog;

struct StepSpec {
    role: &'static str,
    is_required: bool,
    timeout_hours: Option<u32>,
}

const fn required(role: &'static str, timeout_hours: Option<u32>) -> StepSpec {
    StepSpec { role, is_required: true, timeout_hours }
}

const fn optional(role: &'static str, timeout_hours: Option<u32>) -> StepSpec {
    StepSpec { role, is_required: false, timeout_hours }
}

const INVESTOR_ONBOARDING: &[StepSpec] = &[required("compliance_officer", Some(72))];

const HIGH_RISK_INVESTOR: &[StepSpec] = &[
    required("compliance_officer", Some(48)),
    required("risk_manager", Some(48)),
    required("compliance_director", Some(72)),
];

const REDEMPTION: &[StepSpec] =
    &[required("operations_manager", Some(24)), required("compliance_officer", Some(48))];

const LARGE_REDEMPTION: &[StepSpec] = &[
    required("operations_manager", Some(24)),
    required("compliance_officer", Some(48)),
    required("chief_financial_officer", None),
];

const TOKEN_DEPLOYMENT: &[StepSpec] = &[
    required("technical_reviewer", None),
    required("compliance_officer", Some(72)),
    optional("legal_counsel", None),
];

impl WorkflowTemplateCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn workflow_types(&self) -> &'static [WorkflowType] {
        &WorkflowType::ALL
    }

    pub fn template(&self, workflow_type: WorkflowType) -> Vec<ApprovalStep> {
        let specs = match workflow_type {
            WorkflowType::InvestorOnboarding => INVESTOR_ONBOARDING,
            WorkflowType::HighRiskInvestor => HIGH_RISK_INVESTOR,
            WorkflowType::Redemption => REDEMPTION,
            WorkflowType::LargeRedemption => LARGE_REDEMPTION,
            WorkflowType::TokenDeployment => TOKEN_DEPLOYMENT,
        };

        specs
            .iter()
            .zip(1u32..)
            .map(|(spec, order)| ApprovalStep {
                role: spec.role.to_string(),
                order,
                is_required: spec.is_required,
                timeout_hours: spec.timeout_hours,
            })
            .collect()
    }

    /// Lookup for names that arrive at runtime (CLI arguments, stored rows).
    pub fn template_by_name(&self, name: &str) -> Result<Vec<ApprovalStep>, WorkflowError> {
        self.resolve(name).map(|workflow_type| self.template(workflow_type))
    }

    pub fn resolve(&self, name: &str) -> Result<WorkflowType, WorkflowError> {
        WorkflowType::parse(name)
            .ok_or_else(|| WorkflowError::UnknownWorkflowType { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::workflow::WorkflowType;
    use crate::workflows::catalog::WorkflowTemplateCatalog;
    use crate::workflows::machine::WorkflowError;

    #[test]
    fn high_risk_investor_requires_three_ordered_roles() {
        let steps = WorkflowTemplateCatalog::new().template(WorkflowType::HighRiskInvestor);

        let roles: Vec<&str> = steps.iter().map(|step| step.role.as_str()).collect();
        assert_eq!(roles, vec!["compliance_officer", "risk_manager", "compliance_director"]);
        assert_eq!(steps.iter().map(|step| step.order).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(steps.iter().all(|step| step.is_required));
    }

    #[test]
    fn every_registered_type_has_contiguous_one_based_steps() {
        let catalog = WorkflowTemplateCatalog::new();
        for workflow_type in catalog.workflow_types() {
            let steps = catalog.template(*workflow_type);
            assert!(!steps.is_empty(), "{workflow_type} has no steps");
            for (index, step) in steps.iter().enumerate() {
                assert_eq!(step.order as usize, index + 1, "{workflow_type} step order");
            }
        }
    }

    #[test]
    fn template_by_name_rejects_unregistered_types() {
        let error = WorkflowTemplateCatalog::new()
            .template_by_name("kyc_refresh")
            .expect_err("unknown type should fail");

        assert_eq!(error, WorkflowError::UnknownWorkflowType { name: "kyc_refresh".to_string() });
    }

    #[test]
    fn template_by_name_matches_enum_lookup() {
        let catalog = WorkflowTemplateCatalog::new();
        let by_name = catalog.template_by_name("redemption").expect("registered type");

        assert_eq!(by_name, catalog.template(WorkflowType::Redemption));
        assert_eq!(by_name[0].timeout_hours, Some(24));
    }
}
