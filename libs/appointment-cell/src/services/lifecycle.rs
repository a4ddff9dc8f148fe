// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Pure appointment state machine. Transitions are one-directional:
/// requested -> confirmed -> completed, with cancellation allowed from
/// either active state. Completed and cancelled are terminal.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition(*current_status));
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Requested => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    pub fn is_terminal(&self, status: &AppointmentStatus) -> bool {
        self.get_valid_transitions(status).is_empty()
    }

    /// Rescheduling reuses the cancellation rule: only an active
    /// appointment still owns a window that can be moved.
    pub fn can_reschedule(&self, status: &AppointmentStatus) -> bool {
        matches!(
            status,
            AppointmentStatus::Requested | AppointmentStatus::Confirmed
        )
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
