use std::env;
use tracing::warn;

/// How a freshly booked appointment enters the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// Bookings land in `requested` and wait for staff approval.
    StaffConfirm,
    /// Bookings are confirmed immediately.
    DirectConfirm,
}

impl ConfirmationPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "staff_confirm" => Some(Self::StaffConfirm),
            "direct_confirm" => Some(Self::DirectConfirm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_api_key: String,
    pub jwt_secret: String,
    pub default_slot_minutes: i32,
    pub confirmation_policy: ConfirmationPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_url: env::var("DATABASE_REST_URL").unwrap_or_else(|_| {
                warn!("DATABASE_REST_URL not set, using empty value");
                String::new()
            }),
            database_api_key: env::var("DATABASE_API_KEY").unwrap_or_else(|_| {
                warn!("DATABASE_API_KEY not set, using empty value");
                String::new()
            }),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                warn!("JWT_SECRET not set, using empty value");
                String::new()
            }),
            default_slot_minutes: env::var("DEFAULT_SLOT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            confirmation_policy: env::var("BOOKING_CONFIRMATION_POLICY")
                .ok()
                .and_then(|v| ConfirmationPolicy::parse(&v))
                .unwrap_or_else(|| {
                    warn!("BOOKING_CONFIRMATION_POLICY not set or invalid, defaulting to staff_confirm");
                    ConfirmationPolicy::StaffConfirm
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_url.is_empty()
            && !self.database_api_key.is_empty()
            && !self.jwt_secret.is_empty()
    }
}
