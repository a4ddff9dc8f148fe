use assert_matches::assert_matches;

use appointment_cell::models::{AppointmentError, AppointmentStatus};
use appointment_cell::services::lifecycle::AppointmentLifecycleService;

use AppointmentStatus::{Cancelled, Completed, Confirmed, Requested};

#[test]
fn requested_can_be_confirmed_or_cancelled() {
    let lifecycle = AppointmentLifecycleService::new();

    assert!(lifecycle.validate_status_transition(&Requested, &Confirmed).is_ok());
    assert!(lifecycle.validate_status_transition(&Requested, &Cancelled).is_ok());
}

#[test]
fn confirmed_can_be_completed_or_cancelled() {
    let lifecycle = AppointmentLifecycleService::new();

    assert!(lifecycle.validate_status_transition(&Confirmed, &Completed).is_ok());
    assert!(lifecycle.validate_status_transition(&Confirmed, &Cancelled).is_ok());
}

#[test]
fn requested_cannot_skip_to_completed() {
    let lifecycle = AppointmentLifecycleService::new();

    assert_matches!(
        lifecycle.validate_status_transition(&Requested, &Completed),
        Err(AppointmentError::InvalidTransition(Requested))
    );
}

#[test]
fn terminal_states_allow_no_transitions() {
    let lifecycle = AppointmentLifecycleService::new();

    for terminal in [Completed, Cancelled] {
        assert!(lifecycle.is_terminal(&terminal));
        for target in [Requested, Confirmed, Completed, Cancelled] {
            assert_matches!(
                lifecycle.validate_status_transition(&terminal, &target),
                Err(AppointmentError::InvalidTransition(_)),
                "{} -> {} must be rejected",
                terminal,
                target
            );
        }
    }
}

#[test]
fn transitions_are_one_directional() {
    let lifecycle = AppointmentLifecycleService::new();

    assert_matches!(
        lifecycle.validate_status_transition(&Confirmed, &Requested),
        Err(AppointmentError::InvalidTransition(Confirmed))
    );
}

#[test]
fn only_active_appointments_can_be_rescheduled() {
    let lifecycle = AppointmentLifecycleService::new();

    assert!(lifecycle.can_reschedule(&Requested));
    assert!(lifecycle.can_reschedule(&Confirmed));
    assert!(!lifecycle.can_reschedule(&Completed));
    assert!(!lifecycle.can_reschedule(&Cancelled));
}
