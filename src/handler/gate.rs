//! Preconditions checked before `apply` touches any cluster.

/// What the gate looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateInputs<'a> {
    pub strict_check: bool,
    /// Every status except the apply ones is green.
    pub statuses_green: bool,
    pub approved: bool,
    pub base: &'a str,
    pub behind_by: u64,
}

/// The reasons apply must not run, in a fixed order. Empty means go.
///
/// Status and approval are only checked in strict mode; being behind the base
/// always blocks.
pub fn apply_gate_failures(inputs: &GateInputs<'_>) -> Vec<String> {
    let mut reasons = Vec::new();

    if inputs.strict_check && !inputs.statuses_green {
        reasons.push(
            "Cannot run apply because strict-check is set to true and commit status is not green.\n\
             Please fix status and try again."
                .to_string(),
        );
    }
    if inputs.strict_check && !inputs.approved {
        reasons.push(
            "Cannot run apply because strict-check is set to true and request is not approved.\n\
             Please get at least one approval and try again."
                .to_string(),
        );
    }
    if inputs.behind_by > 0 {
        reasons.push(format!(
            "Cannot run apply because branch is behind {} by {} commits.\n\
             Please re-merge and try again.",
            inputs.base, inputs.behind_by
        ));
    }

    reasons
}
