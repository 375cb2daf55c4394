use std::time::Duration;

use actix_web::web;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::db::model::User;
use crate::middleware::{AuthMiddleware, RateLimitMiddleware};

pub mod login;
pub mod logout;
pub mod me;
pub mod password_change;
pub mod password_reset;
pub mod refresh;
pub mod register;
pub mod sessions;

/// The user as returned by the API. Never exposes the password hash or the
/// reset-token columns.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub employee_id: Option<Uuid>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            employee_id: user.employee_id,
            is_active: user.is_active,
            last_login: user.last_login,
            last_login_ip: user.last_login_ip.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub fn configure_auth_routes(
    cfg: &mut web::ServiceConfig,
    auth_middleware: AuthMiddleware,
    security: &SecurityConfig,
) {
    let window = Duration::from_secs(security.rate_limit_window);
    let max_requests = security.rate_limit_max_requests;

    cfg.service(
        web::scope("/auth")
            // Public routes; the credential-sensitive ones sit in their own
            // scopes so each carries its own rate-limit window.
            .service(
                web::scope("/register")
                    .wrap(RateLimitMiddleware::new(max_requests, window))
                    .service(register::register_user),
            )
            .service(
                web::scope("/login")
                    .wrap(RateLimitMiddleware::new(max_requests, window))
                    .service(login::login_user),
            )
            .service(
                web::scope("/password-reset-request")
                    .wrap(RateLimitMiddleware::new(max_requests, window))
                    .service(password_reset::request_password_reset),
            )
            .service(refresh::refresh_token)
            .service(password_reset::reset_password)
            // Protected routes (authentication required)
            .service(
                web::scope("")
                    .wrap(auth_middleware)
                    .service(logout::logout_user)
                    .service(logout::logout_all)
                    .service(password_change::change_password)
                    .service(me::get_current_user)
                    .service(sessions::list_sessions)
                    .service(sessions::revoke_session),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::model::UserRole;

    #[test]
    fn profile_never_carries_credential_material() {
        let user = User {
            id: Uuid::new_v4(),
            email: "hr@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: UserRole::Hr,
            employee_id: Some(Uuid::new_v4()),
            is_active: true,
            failed_login_attempts: 2,
            account_locked_until: None,
            password_reset_token: Some("deadbeef".repeat(8)),
            password_reset_expires: Some(Utc::now()),
            last_login: None,
            last_login_ip: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let profile = UserProfile::from(&user);
        let body = serde_json::to_string(&profile).unwrap();

        assert!(!body.contains("argon2id"));
        assert!(!body.contains("deadbeef"));
        assert!(body.contains("\"role\":\"hr\""));
    }
}
