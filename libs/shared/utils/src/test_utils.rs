use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, ConfirmationPolicy};
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub database_url: String,
    pub database_api_key: String,
    pub confirmation_policy: ConfirmationPolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            database_url: "http://localhost:54321".to_string(),
            database_api_key: "test-api-key".to_string(),
            confirmation_policy: ConfirmationPolicy::StaffConfirm,
        }
    }
}

impl TestConfig {
    pub fn with_database_url(url: &str) -> Self {
        Self {
            database_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_url: self.database_url.clone(),
            database_api_key: self.database_api_key.clone(),
            jwt_secret: self.jwt_secret.clone(),
            default_slot_minutes: 30,
            confirmation_policy: self.confirmation_policy,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn dentist(email: &str) -> Self {
        Self::new(email, "dentist")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST row payloads for wiremock-backed tests.
pub struct MockRows;

impl MockRows {
    pub fn patient(patient_id: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "first_name": "Test",
            "last_name": "Patient",
            "email": "patient@example.com",
            "contact_number": "0917-000-0000",
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn service(service_id: &str, duration_minutes: i32) -> serde_json::Value {
        json!({
            "id": service_id,
            "name": "Oral Prophylaxis",
            "duration_minutes": duration_minutes,
            "is_active": true
        })
    }

    pub fn working_hours(
        dentist_id: &str,
        day_of_week: i16,
        start_time: &str,
        end_time: &str,
        slot_minutes: i32,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "dentist_id": dentist_id,
            "day_of_week": day_of_week,
            "start_time": start_time,
            "end_time": end_time,
            "slot_minutes": slot_minutes,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment(
        appointment_id: &str,
        patient_id: &str,
        dentist_id: &str,
        service_id: &str,
        starts_at: &str,
        ends_at: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "patient_id": patient_id,
            "dentist_id": dentist_id,
            "service_id": service_id,
            "starts_at": starts_at,
            "ends_at": ends_at,
            "status": status,
            "reason": null,
            "staff_notes": null,
            "cancelled_by": null,
            "cancellation_reason": null,
            "arrived_at": null,
            "requested_at": "2024-01-01T00:00:00Z",
            "confirmed_at": null,
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
}
