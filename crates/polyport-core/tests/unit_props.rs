use polyport_core::{
    Diagnostic, Failure, FailureCause, TranslationUnit, UnitStateError, UnitStatus, Verdict,
};
use polyport_graph::FileId;
use proptest::prelude::*;
use std::time::Duration;

fn failing() -> Verdict {
    Verdict::fail(Failure::StaticAnalysis {
        findings: vec![Diagnostic::error("bad").with_code("E999")],
    })
}

/// Drive a unit the way the controller does, one outcome per attempt
fn drive(max: u32, outcomes: &[bool]) -> (TranslationUnit, Vec<u32>) {
    let mut unit = TranslationUnit::new(FileId::new("x.c"), max, false);
    unit.begin().unwrap();
    let mut seen = Vec::new();
    for (i, pass) in outcomes.iter().enumerate() {
        let attempt = unit.next_attempt().unwrap();
        seen.push(attempt);
        let verdict = if *pass { Verdict::pass() } else { failing() };
        unit.record(format!("candidate {i}"), verdict, Duration::ZERO).unwrap();
        if *pass {
            unit.converge().unwrap();
            return (unit, seen);
        }
        if !unit.can_retry() {
            unit.fail(FailureCause::IterationsExhausted).unwrap();
            return (unit, seen);
        }
    }
    (unit, seen)
}

proptest! {
    #[test]
    fn prop_attempts_monotonic_and_bounded(
        max in 1..8u32,
        outcomes in proptest::collection::vec(any::<bool>(), 1..12)
    ) {
        let (unit, seen) = drive(max, &outcomes);
        prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(unit.attempt() <= max);
        prop_assert_eq!(unit.history().len() as u32, unit.attempt());
    }

    #[test]
    fn prop_exhausted_failing_unit_never_converges(
        max in 1..8u32,
        outcomes in proptest::collection::vec(any::<bool>(), 1..12)
    ) {
        let (unit, _) = drive(max, &outcomes);
        let passes_within_bound = outcomes.iter().take(max as usize).any(|p| *p);
        if unit.attempt() == max && !unit.last_verdict().is_some_and(Verdict::is_pass) {
            prop_assert_eq!(unit.status(), UnitStatus::Failed);
        }
        if unit.status() == UnitStatus::Converged {
            prop_assert!(passes_within_bound);
            prop_assert!(unit.last_verdict().is_some_and(Verdict::is_pass));
        }
    }
}

#[test]
fn attempt_past_bound_is_refused() {
    let mut unit = TranslationUnit::new(FileId::new("x.c"), 1, false);
    unit.begin().unwrap();
    unit.next_attempt().unwrap();
    unit.record(String::new(), failing(), Duration::ZERO).unwrap();
    assert_eq!(
        unit.next_attempt(),
        Err(UnitStateError::AttemptBoundReached { max: 1 })
    );
}

#[test]
fn terminal_units_do_not_move() {
    let mut unit = TranslationUnit::new(FileId::new("x.c"), 2, false);
    unit.begin().unwrap();
    unit.fail(FailureCause::Cancelled).unwrap();
    assert!(unit.begin().is_err());
    assert!(unit.converge().is_err());
    assert!(unit.skip(polyport_core::SkipReason::Cancelled).is_err());
    assert_eq!(unit.status(), UnitStatus::Failed);
}
