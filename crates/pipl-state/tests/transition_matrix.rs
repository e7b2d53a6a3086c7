//! Exhaustive NxN transition matrix for the subject lifecycle.

use pipl_state::SubjectState;

#[test]
fn subject_transition_matrix_exhaustive() {
    // Tracking → Notified
    // Notified → Blocked, Tracking
    // Blocked → DeletionNeedsReview, DeletionScheduled, Tracking
    // DeletionNeedsReview → DeletionScheduled, Tracking
    // DeletionScheduled → (none)
    let expected_valid = [
        (SubjectState::Tracking, SubjectState::Notified),
        (SubjectState::Notified, SubjectState::Blocked),
        (SubjectState::Notified, SubjectState::Tracking),
        (SubjectState::Blocked, SubjectState::DeletionNeedsReview),
        (SubjectState::Blocked, SubjectState::DeletionScheduled),
        (SubjectState::Blocked, SubjectState::Tracking),
        (SubjectState::DeletionNeedsReview, SubjectState::DeletionScheduled),
        (SubjectState::DeletionNeedsReview, SubjectState::Tracking),
    ];

    for from in SubjectState::ALL {
        for to in SubjectState::ALL {
            let actual = from.valid_transitions().contains(&to);
            let expected = expected_valid.contains(&(from, to));
            assert_eq!(actual, expected, "transition {from} -> {to}");
        }
    }
}

#[test]
fn only_deletion_scheduled_is_terminal() {
    for state in SubjectState::ALL {
        assert_eq!(
            state.is_terminal(),
            state == SubjectState::DeletionScheduled,
            "{state}"
        );
    }
}

#[test]
fn no_path_to_block_skips_notification() {
    // Blocked is reachable only from Notified.
    for from in SubjectState::ALL {
        if from.valid_transitions().contains(&SubjectState::Blocked) {
            assert_eq!(from, SubjectState::Notified);
        }
    }
}

#[test]
fn every_live_state_can_return_to_tracking() {
    for state in SubjectState::ALL {
        if state == SubjectState::Tracking || state.is_terminal() {
            continue;
        }
        assert!(
            state.valid_transitions().contains(&SubjectState::Tracking),
            "{state}"
        );
    }
}
