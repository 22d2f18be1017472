use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use olist_core::CheckItem;
use serde::{Deserialize, Serialize};

use crate::client::ClientId;

/// Final state of one client after the quiescent phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOutcome {
    pub id: ClientId,
    pub view: Vec<CheckItem>,
    pub pending: usize,
}

/// Everything the oracle inspects after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalState {
    /// Items of the remote list, as stored.
    pub remote: Vec<CheckItem>,
    /// Union of every client's expectation for its own texts.
    pub expected: BTreeMap<String, bool>,
    pub clients: Vec<ClientOutcome>,
    /// Lock record paths still present in the store.
    pub lock_records: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    /// The remote list does not hold exactly the expected items.
    RemoteMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    /// A text appears more than once in the remote list.
    DuplicateText { text: String, count: usize },
    /// A client's view differs from the remote after a quiescent pass.
    LocalDivergence {
        client: ClientId,
        only_local: Vec<String>,
        only_remote: Vec<String>,
    },
    /// A client still has operations queued after the quiescent phase.
    Undrained { client: ClientId, pending: usize },
    /// Lock records survived every transaction.
    LeftoverLocks { paths: Vec<String> },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteMismatch {
                missing,
                unexpected,
            } => write!(
                f,
                "RemoteMismatch: missing={missing:?} unexpected={unexpected:?}"
            ),
            Self::DuplicateText { text, count } => {
                write!(f, "DuplicateText: {text:?} stored {count} times")
            }
            Self::LocalDivergence {
                client,
                only_local,
                only_remote,
            } => write!(
                f,
                "LocalDivergence: client {client} (only_local={only_local:?}, only_remote={only_remote:?})"
            ),
            Self::Undrained { client, pending } => {
                write!(f, "Undrained: client {client} still has {pending} pending")
            }
            Self::LeftoverLocks { paths } => write!(f, "LeftoverLocks: {paths:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// Checks the end state of a simulation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_all(state: &FinalState) -> OracleResult {
        let mut violations = Vec::new();
        violations.extend(Self::check_remote(state));
        violations.extend(Self::check_duplicates(&state.remote));
        violations.extend(Self::check_clients(state));
        if !state.lock_records.is_empty() {
            violations.push(InvariantViolation::LeftoverLocks {
                paths: state.lock_records.clone(),
            });
        }
        OracleResult::from_violations(violations)
    }

    fn check_remote(state: &FinalState) -> Option<InvariantViolation> {
        let stored = encoded(&state.remote);
        let expected: BTreeSet<String> = state
            .expected
            .iter()
            .map(|(text, checked)| CheckItem::new(text.clone(), *checked).to_string())
            .collect();
        if stored == expected {
            return None;
        }
        Some(InvariantViolation::RemoteMismatch {
            missing: expected.difference(&stored).cloned().collect(),
            unexpected: stored.difference(&expected).cloned().collect(),
        })
    }

    fn check_duplicates(remote: &[CheckItem]) -> Vec<InvariantViolation> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for item in remote {
            *counts.entry(item.text()).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(text, count)| InvariantViolation::DuplicateText {
                text: text.to_owned(),
                count,
            })
            .collect()
    }

    fn check_clients(state: &FinalState) -> Vec<InvariantViolation> {
        let remote = encoded(&state.remote);
        let mut violations = Vec::new();
        for client in &state.clients {
            if client.pending > 0 {
                violations.push(InvariantViolation::Undrained {
                    client: client.id,
                    pending: client.pending,
                });
            }
            let local = encoded(&client.view);
            if local != remote {
                violations.push(InvariantViolation::LocalDivergence {
                    client: client.id,
                    only_local: local.difference(&remote).cloned().collect(),
                    only_remote: remote.difference(&local).cloned().collect(),
                });
            }
        }
        violations
    }
}

fn encoded(items: &[CheckItem]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged() -> FinalState {
        let items = vec![CheckItem::unchecked("milk"), CheckItem::new("bread", true)];
        FinalState {
            remote: items.clone(),
            expected: BTreeMap::from([("milk".to_owned(), false), ("bread".to_owned(), true)]),
            clients: vec![
                ClientOutcome {
                    id: 0,
                    view: items.clone(),
                    pending: 0,
                },
                ClientOutcome {
                    id: 1,
                    view: items.into_iter().rev().collect(),
                    pending: 0,
                },
            ],
            lock_records: Vec::new(),
        }
    }

    #[test]
    fn converged_state_passes() {
        let result = ConvergenceOracle::check_all(&converged());
        assert!(result.passed, "{:?}", result.violations);
    }

    #[test]
    fn lost_update_is_reported() {
        let mut state = converged();
        state.remote.pop();
        state.clients[0].view.pop();
        state.clients[1].view.remove(0);
        let result = ConvergenceOracle::check_all(&state);
        assert_eq!(
            result.violations,
            vec![InvariantViolation::RemoteMismatch {
                missing: vec!["[✔] bread".to_owned()],
                unexpected: Vec::new(),
            }]
        );
    }

    #[test]
    fn divergent_client_is_reported() {
        let mut state = converged();
        state.clients[1].view.push(CheckItem::unchecked("tea"));
        state.clients[1].pending = 1;
        let result = ConvergenceOracle::check_all(&state);
        assert!(!result.passed);
        assert!(result
            .violations
            .contains(&InvariantViolation::Undrained { client: 1, pending: 1 }));
        assert!(result.violations.iter().any(|v| matches!(
            v,
            InvariantViolation::LocalDivergence { client: 1, .. }
        )));
    }

    #[test]
    fn duplicates_and_leftover_locks_are_reported() {
        let mut state = converged();
        state.remote.push(CheckItem::new("milk", true));
        state.lock_records.push(".groceries.lock00".to_owned());
        let result = ConvergenceOracle::check_all(&state);
        assert!(result.violations.contains(&InvariantViolation::DuplicateText {
            text: "milk".to_owned(),
            count: 2
        }));
        assert!(result.violations.iter().any(|v| matches!(v, InvariantViolation::LeftoverLocks { .. })));
    }
}
