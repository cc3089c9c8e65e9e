//! Decoding of status checks back into workflow progress.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::commands::CommandKind;

use super::PullRequestStatus;

static CONTEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"kubeapply/(\S+) \((\S+)\)").expect("context regex is valid"));

static DESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"for clusters (\S+)").expect("description regex is valid"));

/// A status written by the engine, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStatus {
    pub command: String,
    pub env: String,
    pub cluster_ids: Vec<String>,
}

/// Decodes a status written by the engine; `None` for anything else.
pub fn decode_status(status: &PullRequestStatus) -> Option<DecodedStatus> {
    let context = CONTEXT_RE.captures(&status.context)?;
    let description = DESCRIPTION_RE.captures(&status.description)?;

    Some(DecodedStatus {
        command: context[1].to_string(),
        env: context[2].to_string(),
        cluster_ids: description[1].split(',').map(str::to_string).collect(),
    })
}

/// Which clusters have been diffed and applied, derived from current statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    /// Every cluster id in any decoded status.
    pub all: BTreeSet<String>,
    /// Ids in any diff status, whatever its state.
    pub diffed: BTreeSet<String>,
    /// Ids in a successful apply status.
    pub applied: BTreeSet<String>,
}

impl WorkflowState {
    pub fn from_statuses(statuses: &[PullRequestStatus]) -> Self {
        let mut state = WorkflowState::default();

        for status in statuses {
            let Some(decoded) = decode_status(status) else {
                continue;
            };

            let diff = decoded.command == CommandKind::Diff.as_str();
            let successful_apply =
                decoded.command == CommandKind::Apply.as_str() && status.is_success();

            for id in decoded.cluster_ids {
                if diff {
                    state.diffed.insert(id.clone());
                } else if successful_apply {
                    state.applied.insert(id.clone());
                }
                state.all.insert(id);
            }
        }

        state
    }

    /// True iff at least one cluster was seen and every seen cluster is both
    /// diffed and applied.
    pub fn is_complete(&self) -> bool {
        if self.all.is_empty() {
            info!("no command statuses found, workflow not complete");
            return false;
        }

        for id in &self.all {
            let diffed = self.diffed.contains(id);
            let applied = self.applied.contains(id);
            if !diffed || !applied {
                info!(cluster_id = %id, diffed, applied, "cluster not fully diffed and applied");
                return false;
            }
        }

        true
    }
}

/// Whether every status is green.
pub fn all_green(statuses: &[PullRequestStatus]) -> bool {
    match statuses.iter().find(|s| !s.is_success()) {
        Some(status) => {
            debug!(context = %status.context, state = %status.state, "status is not green");
            false
        }
        None => true,
    }
}

/// Whether every status other than the engine's own apply statuses is green.
pub fn non_apply_green(statuses: &[PullRequestStatus]) -> bool {
    match statuses
        .iter()
        .find(|s| !s.context.contains("kubeapply/apply") && !s.is_success())
    {
        Some(status) => {
            debug!(context = %status.context, state = %status.state, "non-apply status is not green");
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::format::{
        DESCRIPTION_LIMIT, StatusOutcome, command_context, hashed_cluster_names,
        status_description,
    };
    use crate::status::StatusState;
    use proptest::prelude::*;

    fn status(context: &str, state: StatusState, description: &str) -> PullRequestStatus {
        PullRequestStatus::new(context, description, state)
    }

    struct Case {
        statuses: Vec<PullRequestStatus>,
        all_green: bool,
        ok_to_apply: bool,
        completed: bool,
    }

    #[test]
    fn status_checks() {
        use StatusState::{Failure, Success};

        let cases = vec![
            Case {
                statuses: vec![],
                all_green: true,
                ok_to_apply: true,
                completed: false,
            },
            Case {
                statuses: vec![status("check", Failure, "check failed")],
                all_green: false,
                ok_to_apply: false,
                completed: false,
            },
            Case {
                statuses: vec![
                    status("check", Success, "check succeeded"),
                    status("kubeapply/diff (stage)", Success, "successful for clusters cluster1,cluster2"),
                ],
                all_green: true,
                ok_to_apply: true,
                completed: false,
            },
            Case {
                statuses: vec![
                    status("check", Success, "check succeeded"),
                    status("kubeapply/diff (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/apply (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/diff (production)", Success, "successful for clusters cluster3,cluster4"),
                    status("kubeapply/apply (production)", Failure, "failure for clusters cluster3,cluster4"),
                ],
                all_green: false,
                ok_to_apply: true,
                completed: false,
            },
            Case {
                statuses: vec![
                    status("check", Success, ""),
                    status("kubeapply/diff (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/apply (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/diff (production)", Success, "successful for clusters cluster3,cluster4"),
                    status("kubeapply/apply (production)", Success, "successful for clusters cluster3,cluster4"),
                ],
                all_green: true,
                ok_to_apply: true,
                completed: true,
            },
            Case {
                statuses: vec![
                    status("check", Success, ""),
                    status("kubeapply/diff (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/apply (stage)", Success, "successful for clusters cluster2"),
                ],
                all_green: true,
                ok_to_apply: true,
                completed: false,
            },
            Case {
                statuses: vec![
                    status("check", Success, ""),
                    status("kubeapply/diff (stage)", Success, "successful for clusters cluster1,cluster2"),
                    status("kubeapply/apply (stage)", Success, "successful for clusters cluster1"),
                    status("kubeapply/apply (stage)", Success, "successful for clusters cluster2"),
                ],
                all_green: true,
                ok_to_apply: true,
                completed: true,
            },
        ];

        for (index, case) in cases.iter().enumerate() {
            assert_eq!(all_green(&case.statuses), case.all_green, "case {index}");
            assert_eq!(non_apply_green(&case.statuses), case.ok_to_apply, "case {index}");
            assert_eq!(
                WorkflowState::from_statuses(&case.statuses).is_complete(),
                case.completed,
                "case {index}"
            );
        }
    }

    #[test]
    fn failed_diff_still_counts_as_diffed() {
        let statuses = vec![
            status("kubeapply/diff (stage)", StatusState::Failure, "Error running for clusters a"),
            status("kubeapply/apply (stage)", StatusState::Success, "Successfully ran for clusters a"),
        ];
        assert!(WorkflowState::from_statuses(&statuses).is_complete());
    }

    #[test]
    fn statuses_without_descriptions_are_ignored() {
        let statuses = vec![
            status("kubeapply/diff (stage)", StatusState::Success, ""),
            status("kubeapply/apply (stage)", StatusState::Success, ""),
        ];
        let state = WorkflowState::from_statuses(&statuses);
        assert!(state.all.is_empty());
        assert!(!state.is_complete());
    }

    #[test]
    fn decode_extracts_fields() {
        let decoded = decode_status(&status(
            "kubeapply/apply (production)",
            StatusState::Pending,
            "Running for clusters 1a2b3c4d,5e6f7a8b",
        ))
        .unwrap();
        assert_eq!(decoded.command, "apply");
        assert_eq!(decoded.env, "production");
        assert_eq!(decoded.cluster_ids, vec!["1a2b3c4d", "5e6f7a8b"]);

        assert_eq!(
            decode_status(&status("ci/build", StatusState::Success, "for clusters a")),
            None
        );
    }

    /// Largest number of clusters whose ids fit in the longest description.
    fn max_clusters() -> usize {
        let fixed = status_description(StatusOutcome::Succeeded, "").len();
        // Each id is 8 characters plus a comma separator.
        (DESCRIPTION_LIMIT - fixed + 1) / 9
    }

    proptest! {
        /// Encoding outcomes then decoding reproduces the diffed and applied sets.
        #[test]
        fn status_roundtrip(
            names in proptest::collection::btree_set("[a-z]{1,6}:[a-z0-9-]{1,9}:[a-z0-9]{1,8}", 0..=max_clusters()),
            applied_count in 0usize..=max_clusters(),
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let applied_names = &names[..applied_count.min(names.len())];

            let diff_description = status_description(StatusOutcome::Succeeded, &hashed_cluster_names(&names));
            let apply_description = status_description(StatusOutcome::Succeeded, &hashed_cluster_names(applied_names));
            prop_assert!(diff_description.len() <= DESCRIPTION_LIMIT);

            let statuses = vec![
                status(&command_context(CommandKind::Diff, "stage"), StatusState::Success, &diff_description),
                status(&command_context(CommandKind::Apply, "stage"), StatusState::Success, &apply_description),
            ];
            let state = WorkflowState::from_statuses(&statuses);

            let expected_diffed: BTreeSet<String> =
                names.iter().map(|n| crate::status::cluster_id(n)).collect();
            let expected_applied: BTreeSet<String> =
                applied_names.iter().map(|n| crate::status::cluster_id(n)).collect();

            prop_assert_eq!(&state.diffed, &expected_diffed);
            prop_assert_eq!(&state.applied, &expected_applied);
            prop_assert_eq!(
                state.is_complete(),
                !names.is_empty() && expected_applied == expected_diffed
            );
        }

        /// One failing non-apply status is never green, whatever else is present.
        #[test]
        fn failing_check_blocks_green(
            extra in proptest::collection::vec("[a-z/]{1,12}", 0..5),
            position in 0usize..5,
        ) {
            let mut statuses: Vec<PullRequestStatus> = extra
                .iter()
                .map(|ctx| status(ctx, StatusState::Success, ""))
                .collect();
            let index = position.min(statuses.len());
            statuses.insert(index, status("ci/test", StatusState::Failure, "tests failed"));

            prop_assert!(!non_apply_green(&statuses));
            prop_assert!(!all_green(&statuses));
        }
    }
}
