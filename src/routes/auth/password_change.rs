use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db::{model::User, schema::users, AppState},
    middleware::{extract_ip_address, extract_user_agent, request_claims},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
    utils::password::PasswordService,
};

#[derive(Error, Debug)]
pub enum PasswordChangeError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Current password is incorrect")]
    WrongCurrentPassword,
    #[error("Password validation error: {0}")]
    PasswordError(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PasswordChangeError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            PasswordChangeError::InvalidToken => {
                HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "invalid_token",
                    "message": "Invalid or missing authentication token"
                }))
            }
            PasswordChangeError::WrongCurrentPassword => {
                HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "invalid_credentials",
                    "message": "Current password is incorrect"
                }))
            }
            PasswordChangeError::PasswordError(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "validation_failed",
                    "message": msg
                }))
            }
            PasswordChangeError::UserNotFound => {
                HttpResponse::NotFound().json(serde_json::json!({
                    "error": "user_not_found",
                    "message": "User account not found"
                }))
            }
            PasswordChangeError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct ChangePasswordResponse {
    pub message: String,
    pub other_sessions_revoked: u64,
}

/// Authenticated password change. Every other session is revoked; the one
/// behind the presented access token stays alive.
#[post("/change-password")]
pub async fn change_password(
    request: web::Json<ChangePasswordRequest>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_change_password(request.into_inner(), &pool, &http_req).await {
        Ok(response) => {
            info!("Password changed");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            warn!("Password change failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_change_password(
    request: ChangePasswordRequest,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<ChangePasswordResponse, PasswordChangeError> {
    let claims = request_claims(http_req).ok_or(PasswordChangeError::InvalidToken)?;
    let user_id = claims
        .user_id()
        .map_err(|_| PasswordChangeError::InvalidToken)?;
    let current_jti = claims
        .token_id()
        .map_err(|_| PasswordChangeError::InvalidToken)?;

    PasswordService::validate_password_strength(&request.new_password)
        .map_err(|errors| PasswordChangeError::PasswordError(errors.join("; ")))?;

    let mut conn = pool
        .db
        .get()
        .map_err(|e| PasswordChangeError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::id.eq(user_id))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| PasswordChangeError::DatabaseError(e.to_string()))?
        .ok_or(PasswordChangeError::UserNotFound)?;

    let current_ok =
        PasswordService::verify_password(&request.current_password, &user.password_hash)
            .map_err(|e| PasswordChangeError::DatabaseError(e.to_string()))?;

    let ip_address = extract_ip_address(http_req);
    let user_agent = extract_user_agent(http_req);
    let audit_service = AuditService::new(pool.db.clone());

    if !current_ok {
        audit_service
            .record(
                AuditEntry::failure("auth.password_change", "user", "wrong current password")
                    .user(user.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(PasswordChangeError::WrongCurrentPassword);
    }

    let new_password_hash = PasswordService::hash_password(&request.new_password)
        .map_err(|e| PasswordChangeError::PasswordError(e.to_string()))?;

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set(users::password_hash.eq(&new_password_hash))
        .execute(&mut conn)
        .map_err(|e| PasswordChangeError::DatabaseError(e.to_string()))?;

    let session_service = SessionService::new(pool.db.clone());
    let other_sessions_revoked = session_service
        .revoke_others(user.id, current_jti)
        .await
        .map_err(|e| PasswordChangeError::DatabaseError(e.to_string()))?;

    audit_service
        .record(
            AuditEntry::success("auth.password_change", "user")
                .user(user.id)
                .resource(user.id)
                .changes(serde_json::json!({
                    "password_hash": {"old": "[redacted]", "new": "[redacted]"}
                }))
                .client(&ip_address, &user_agent),
        )
        .await;

    Ok(ChangePasswordResponse {
        message: "Password changed successfully".to_string(),
        other_sessions_revoked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_current_password_answers_unauthorized() {
        assert_eq!(
            PasswordChangeError::WrongCurrentPassword
                .to_http_response()
                .status(),
            actix_web::http::StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn weak_new_password_answers_bad_request() {
        assert_eq!(
            PasswordChangeError::PasswordError("too weak".to_string())
                .to_http_response()
                .status(),
            actix_web::http::StatusCode::BAD_REQUEST
        );
    }
}
