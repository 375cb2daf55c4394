use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use chrono::{Duration, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::{
    config::AppConfig,
    db::{model::User, schema::users, AppState},
    middleware::{extract_ip_address, extract_user_agent},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
    utils::{password::PasswordService, token::TokenService},
};

#[derive(Error, Debug)]
pub enum PasswordResetError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Password validation error: {0}")]
    PasswordError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PasswordResetError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            PasswordResetError::InvalidToken => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_token",
                    "message": "Password reset token is invalid, expired, or already used"
                }))
            }
            PasswordResetError::PasswordError(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "validation_failed",
                    "message": msg
                }))
            }
            PasswordResetError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestPasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct PasswordResetResponse {
    pub message: String,
}

const GENERIC_RESET_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been issued";

/// Start a password reset. The response is identical whether or not the
/// account exists so the endpoint cannot be used to enumerate emails.
#[post("")]
pub async fn request_password_reset(
    request: web::Json<RequestPasswordResetRequest>,
    pool: Data<AppState>,
    config: Data<AppConfig>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    info!("Password reset request");

    match handle_request_password_reset(request.into_inner(), &pool, &config, &http_req).await {
        Ok(()) => Ok(HttpResponse::Ok().json(PasswordResetResponse {
            message: GENERIC_RESET_MESSAGE.to_string(),
        })),
        Err(e @ PasswordResetError::PasswordError(_)) => Ok(e.to_http_response()),
        Err(e) => {
            error!("Password reset request failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_request_password_reset(
    request: RequestPasswordResetRequest,
    pool: &AppState,
    config: &AppConfig,
    http_req: &HttpRequest,
) -> Result<(), PasswordResetError> {
    request
        .validate()
        .map_err(|e| PasswordResetError::PasswordError(e.to_string()))?;

    let email = request.email.trim().to_lowercase();

    let mut conn = pool
        .db
        .get()
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    let Some(user) = user else {
        // Unknown email: same outward response, no stored state.
        return Ok(());
    };

    if !user.is_active {
        return Ok(());
    }

    // A new request overwrites any previous token, so at most one reset
    // token is outstanding per user.
    let reset_token = TokenService::generate_token();
    let token_digest = TokenService::hash_token(&reset_token);
    let expires_at = Utc::now() + Duration::seconds(config.security.reset_token_expiry as i64);

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::password_reset_token.eq(Some(token_digest.as_str())),
            users::password_reset_expires.eq(Some(expires_at)),
        ))
        .execute(&mut conn)
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    // Delivery is handled outside this service. Surface the token in
    // development so the flow can be exercised without a mail pipeline.
    if config.is_development() {
        debug!("Password reset token for {}: {}", user.email, reset_token);
    }

    let audit_service = AuditService::new(pool.db.clone());
    audit_service
        .record(
            AuditEntry::success("auth.password_reset_request", "user")
                .user(user.id)
                .resource(user.id)
                .client(
                    &extract_ip_address(http_req),
                    &extract_user_agent(http_req),
                ),
        )
        .await;

    Ok(())
}

/// Complete a password reset with a previously issued token. Tokens are
/// single use: the columns are cleared in the same update that writes the
/// new password hash.
#[post("/password-reset")]
pub async fn reset_password(
    request: web::Json<ResetPasswordRequest>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    info!("Password reset attempt");

    match handle_reset_password(request.into_inner(), &pool, &http_req).await {
        Ok(response) => {
            info!("Password reset successful");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            warn!("Password reset failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_reset_password(
    request: ResetPasswordRequest,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<PasswordResetResponse, PasswordResetError> {
    PasswordService::validate_password_strength(&request.new_password)
        .map_err(|errors| PasswordResetError::PasswordError(errors.join("; ")))?;

    let token_digest = TokenService::hash_token(&request.token);
    let ip_address = extract_ip_address(http_req);
    let user_agent = extract_user_agent(http_req);
    let audit_service = AuditService::new(pool.db.clone());

    let mut conn = pool
        .db
        .get()
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::password_reset_token.eq(&token_digest))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    let Some(user) = user else {
        audit_service
            .record(
                AuditEntry::failure("auth.password_reset", "user", "unknown or used token")
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(PasswordResetError::InvalidToken);
    };

    if !user.has_valid_reset_token() {
        audit_service
            .record(
                AuditEntry::failure("auth.password_reset", "user", "expired token")
                    .user(user.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(PasswordResetError::InvalidToken);
    }

    let new_password_hash = PasswordService::hash_password(&request.new_password)
        .map_err(|e| PasswordResetError::PasswordError(e.to_string()))?;

    // One update: new hash, consumed token, cleared lockout state.
    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::password_hash.eq(&new_password_hash),
            users::password_reset_token.eq(None::<&str>),
            users::password_reset_expires.eq(None::<chrono::DateTime<Utc>>),
            users::failed_login_attempts.eq(0),
            users::account_locked_until.eq(None::<chrono::DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    // Anyone holding an old session (possibly the attacker who forced the
    // reset) is signed out.
    let session_service = SessionService::new(pool.db.clone());
    session_service
        .revoke_all(user.id)
        .await
        .map_err(|e| PasswordResetError::DatabaseError(e.to_string()))?;

    audit_service
        .record(
            AuditEntry::success("auth.password_reset", "user")
                .user(user.id)
                .resource(user.id)
                .changes(serde_json::json!({
                    "password_hash": {"old": "[redacted]", "new": "[redacted]"}
                }))
                .client(&ip_address, &user_agent),
        )
        .await;

    Ok(PasswordResetResponse {
        message: "Password reset successfully".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_answers_bad_request() {
        assert_eq!(
            PasswordResetError::InvalidToken.to_http_response().status(),
            actix_web::http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn reset_request_validation() {
        let bad = RequestPasswordResetRequest {
            email: "nope".to_string(),
        };
        assert!(bad.validate().is_err());

        let ok = RequestPasswordResetRequest {
            email: "person@example.com".to_string(),
        };
        assert!(ok.validate().is_ok());
    }
}
