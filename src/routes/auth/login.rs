use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use chrono::{Duration, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::{
    config::AppConfig,
    db::{
        model::User,
        schema::users,
        AppState,
    },
    middleware::{extract_ip_address, extract_user_agent},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
    utils::{jwt::JwtKeys, password::PasswordService},
};

use super::UserProfile;

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account locked")]
    AccountLocked,
    #[error("Account disabled")]
    AccountDisabled,
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Token generation error: {0}")]
    TokenError(String),
}

impl LoginError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            LoginError::InvalidCredentials => HttpResponse::Unauthorized().json(
                serde_json::json!({
                    "error": "invalid_credentials",
                    "message": "Invalid email or password"
                }),
            ),
            LoginError::AccountLocked => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "account_locked",
                "message": "Account is temporarily locked due to repeated failed logins"
            })),
            LoginError::AccountDisabled => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "account_disabled",
                "message": "Account has been disabled"
            })),
            LoginError::ValidationFailed(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "validation_failed",
                    "message": msg
                }))
            }
            LoginError::DatabaseError(_) | LoginError::TokenError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: UserProfile,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
}

#[post("")]
pub async fn login_user(
    request: web::Json<LoginRequest>,
    pool: Data<AppState>,
    config: Data<AppConfig>,
    jwt_keys: Data<JwtKeys>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    info!("Login attempt");

    match handle_login(request.into_inner(), &pool, &config, &jwt_keys, &http_req).await {
        Ok(response) => {
            info!("Login successful for {}", response.user.email);
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            warn!("Login failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_login(
    request: LoginRequest,
    pool: &AppState,
    config: &AppConfig,
    jwt_keys: &JwtKeys,
    http_req: &HttpRequest,
) -> Result<LoginResponse, LoginError> {
    request
        .validate()
        .map_err(|e| LoginError::ValidationFailed(e.to_string()))?;

    let email = request.email.trim().to_lowercase();
    let ip_address = extract_ip_address(http_req);
    let user_agent = extract_user_agent(http_req);
    let audit_service = AuditService::new(pool.db.clone());

    let mut conn = pool
        .db
        .get()
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    let Some(user) = user else {
        audit_service
            .record(
                AuditEntry::failure("auth.login", "session", "unknown email")
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(LoginError::InvalidCredentials);
    };

    if !user.is_active {
        audit_service
            .record(
                AuditEntry::failure("auth.login", "session", "account disabled")
                    .user(user.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(LoginError::AccountDisabled);
    }

    if user.is_locked() {
        audit_service
            .record(
                AuditEntry::failure("auth.login", "session", "account locked")
                    .user(user.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(LoginError::AccountLocked);
    }

    let password_ok = PasswordService::verify_password(&request.password, &user.password_hash)
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    if !password_ok {
        record_failed_attempt(
            &user,
            &mut conn,
            config,
            &audit_service,
            &ip_address,
            &user_agent,
        )
        .await?;
        return Err(LoginError::InvalidCredentials);
    }

    // Successful authentication: clear the failure counter and any stale
    // lock, stamp the login metadata.
    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::failed_login_attempts.eq(0),
            users::account_locked_until.eq(None::<chrono::DateTime<Utc>>),
            users::last_login.eq(Some(Utc::now())),
            users::last_login_ip.eq(Some(ip_address.as_str())),
        ))
        .execute(&mut conn)
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    let (access_token, jti) = jwt_keys
        .generate_access_token(user.id, &user.email, user.role)
        .map_err(|e| LoginError::TokenError(e.to_string()))?;

    let session_service = SessionService::new(pool.db.clone());
    let (session, refresh_token) = session_service
        .create_session(
            user.id,
            jti,
            &ip_address,
            &user_agent,
            Duration::seconds(config.jwt.refresh_token_expiry as i64),
        )
        .await
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    audit_service
        .record(
            AuditEntry::success("auth.login", "session")
                .user(user.id)
                .resource(session.id)
                .client(&ip_address, &user_agent),
        )
        .await;

    Ok(LoginResponse {
        message: "Login successful".to_string(),
        user: UserProfile::from(&user),
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_keys.access_token_expiry_secs(),
        refresh_token,
    })
}

/// Bump the failure counter and lock the account once it reaches the
/// configured threshold. The caller answers `InvalidCredentials` either way
/// so clients cannot probe the counter.
async fn record_failed_attempt(
    user: &User,
    conn: &mut diesel::r2d2::PooledConnection<
        diesel::r2d2::ConnectionManager<diesel::PgConnection>,
    >,
    config: &AppConfig,
    audit_service: &AuditService,
    ip_address: &str,
    user_agent: &str,
) -> Result<(), LoginError> {
    let new_attempts = user.failed_login_attempts + 1;
    let should_lock = new_attempts >= config.security.max_failed_attempts as i32;

    let lock_until = if should_lock {
        Some(Utc::now() + Duration::seconds(config.security.lockout_duration as i64))
    } else {
        None
    };

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::failed_login_attempts.eq(new_attempts),
            users::account_locked_until.eq(lock_until),
        ))
        .execute(conn)
        .map_err(|e| LoginError::DatabaseError(e.to_string()))?;

    audit_service
        .record(
            AuditEntry::failure("auth.login", "session", "invalid credentials")
                .user(user.id)
                .client(ip_address, user_agent),
        )
        .await;

    if should_lock {
        error!(
            "Account {} locked after {} failed login attempts",
            user.email, new_attempts
        );
        audit_service
            .record(
                AuditEntry::failure("auth.account_locked", "user", "too many failed logins")
                    .user(user.id)
                    .resource(user.id)
                    .changes(serde_json::json!({
                        "failed_login_attempts": new_attempts,
                        "account_locked_until": lock_until,
                    }))
                    .client(ip_address, user_agent),
            )
            .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_failures_all_answer_unauthorized() {
        for err in [
            LoginError::InvalidCredentials,
            LoginError::AccountLocked,
            LoginError::AccountDisabled,
        ] {
            assert_eq!(
                err.to_http_response().status(),
                actix_web::http::StatusCode::UNAUTHORIZED
            );
        }
    }

    #[test]
    fn blank_credentials_fail_validation() {
        let request = LoginRequest {
            email: "".to_string(),
            password: "".to_string(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let response = LoginError::DatabaseError("pg down".to_string()).to_http_response();
        assert_eq!(
            response.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
