//! Batch step condition evaluation (§4.4 "Batch").

use serde::{Deserialize, Serialize};

/// A condition guarding a batch step. Untagged so `{ok: N}`, `{error: N}`,
/// `{not: C}`, `{and: [...]}`, `{or: [...]}` and `{is_autocommit: b}` all
/// deserialize from their natural JSON shape without an explicit tag field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Ok { ok: usize },
    Error { error: usize },
    Not { not: Box<Condition> },
    And { and: Vec<Condition> },
    Or { or: Vec<Condition> },
    IsAutocommit { is_autocommit: bool },
}

/// Outcome of a single prior step, as seen by a later step's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Error,
    /// The step itself was skipped by its own condition; an index pointing
    /// at a skipped step behaves as neither ok nor error for `{ok:N}`/
    /// `{error:N}` (both fail), matching "indices outside what actually
    /// produced a result fail the condition silently").
    Skipped,
}

/// Evaluate `condition` against the outcomes of steps `[0, current)`.
/// Absent conditions are handled by the caller (always-pass); an index
/// outside `[0, current)` fails the condition silently (§4.4).
pub fn evaluate(condition: &Condition, outcomes: &[StepOutcome], current: usize) -> bool {
    match condition {
        Condition::Ok { ok } => matches!(lookup(outcomes, current, *ok), Some(StepOutcome::Ok)),
        Condition::Error { error } => matches!(lookup(outcomes, current, *error), Some(StepOutcome::Error)),
        Condition::Not { not } => !evaluate(not, outcomes, current),
        Condition::And { and } => and.iter().all(|c| evaluate(c, outcomes, current)),
        Condition::Or { or } => or.iter().any(|c| evaluate(c, outcomes, current)),
        Condition::IsAutocommit { is_autocommit } => {
            // The core never holds a transaction open across pipelines, so
            // autocommit is always true here.
            *is_autocommit
        }
    }
}

fn lookup(outcomes: &[StepOutcome], current: usize, index: usize) -> Option<StepOutcome> {
    if index >= current {
        return None;
    }
    outcomes.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_condition_passes_when_step_produced_a_result() {
        let outcomes = vec![StepOutcome::Ok, StepOutcome::Error];
        assert!(evaluate(&Condition::Ok { ok: 0 }, &outcomes, 2));
        assert!(!evaluate(&Condition::Ok { ok: 1 }, &outcomes, 2));
    }

    #[test]
    fn error_condition_passes_when_step_errored() {
        let outcomes = vec![StepOutcome::Ok, StepOutcome::Error];
        assert!(evaluate(&Condition::Error { error: 1 }, &outcomes, 2));
        assert!(!evaluate(&Condition::Error { error: 0 }, &outcomes, 2));
    }

    #[test]
    fn not_inverts_the_inner_condition() {
        let outcomes = vec![StepOutcome::Ok];
        assert!(!evaluate(&Condition::Not { not: Box::new(Condition::Ok { ok: 0 }) }, &outcomes, 1));
    }

    #[test]
    fn and_requires_every_subcondition() {
        let outcomes = vec![StepOutcome::Ok, StepOutcome::Ok];
        let cond = Condition::And {
            and: vec![Condition::Ok { ok: 0 }, Condition::Ok { ok: 1 }],
        };
        assert!(evaluate(&cond, &outcomes, 2));
        let cond = Condition::And {
            and: vec![Condition::Ok { ok: 0 }, Condition::Error { error: 1 }],
        };
        assert!(!evaluate(&cond, &outcomes, 2));
    }

    #[test]
    fn or_requires_one_subcondition() {
        let outcomes = vec![StepOutcome::Error, StepOutcome::Ok];
        let cond = Condition::Or {
            or: vec![Condition::Ok { ok: 0 }, Condition::Ok { ok: 1 }],
        };
        assert!(evaluate(&cond, &outcomes, 2));
    }

    #[test]
    fn skipped_step_satisfies_neither_ok_nor_error() {
        let outcomes = vec![StepOutcome::Skipped];
        assert!(!evaluate(&Condition::Ok { ok: 0 }, &outcomes, 1));
        assert!(!evaluate(&Condition::Error { error: 0 }, &outcomes, 1));
    }

    #[test]
    fn out_of_range_index_fails_silently() {
        let outcomes = vec![StepOutcome::Ok];
        assert!(!evaluate(&Condition::Ok { ok: 5 }, &outcomes, 1));
        // Forward references (index >= current) also fail, not panic.
        assert!(!evaluate(&Condition::Ok { ok: 1 }, &outcomes, 1));
    }

    #[test]
    fn is_autocommit_matches_the_always_true_server_state() {
        assert!(evaluate(&Condition::IsAutocommit { is_autocommit: true }, &[], 0));
        assert!(!evaluate(&Condition::IsAutocommit { is_autocommit: false }, &[], 0));
    }
}
