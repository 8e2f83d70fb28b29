//! Pipeline stages applied to each component: transform, then validate.

pub mod transform;
pub mod validate;

pub use transform::{RetryPolicy, TransformContext, TransformStage};
pub use validate::{Issue, IssueKind, Severity, StructuralValidator, ValidationReport, Validator};

use crate::component::ComponentRole;

/// Stage name used in fingerprints and oracle requests.
///
/// Corrective retries get their own name so a corrective outcome can never be
/// confused with a first-attempt outcome for the same text.
pub fn transform_stage_name(role: ComponentRole, corrective: bool) -> String {
    if corrective {
        format!("transform.retry/{}", role.as_str())
    } else {
        format!("transform/{}", role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Hook;

    #[test]
    fn stage_names() {
        assert_eq!(transform_stage_name(ComponentRole::Test, false), "transform/test");
        assert_eq!(
            transform_stage_name(ComponentRole::Hook(Hook::After), true),
            "transform.retry/hook"
        );
    }
}
