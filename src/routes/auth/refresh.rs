use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use chrono::Duration;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::AppConfig,
    db::{model::User, schema::users, AppState},
    middleware::{extract_ip_address, extract_user_agent},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
    utils::jwt::JwtKeys,
};

use super::UserProfile;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Invalid or expired refresh token")]
    InvalidToken,
    #[error("Account disabled")]
    AccountDisabled,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Token generation error: {0}")]
    TokenError(String),
}

impl RefreshError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            RefreshError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_refresh_token",
                "message": "Refresh token is invalid, expired, or revoked"
            })),
            RefreshError::AccountDisabled => {
                HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "account_disabled",
                    "message": "Account has been disabled"
                }))
            }
            RefreshError::DatabaseError(_) | RefreshError::TokenError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub user: UserProfile,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
}

#[post("/refresh")]
pub async fn refresh_token(
    request: web::Json<RefreshRequest>,
    pool: Data<AppState>,
    config: Data<AppConfig>,
    jwt_keys: Data<JwtKeys>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_refresh(request.into_inner(), &pool, &config, &jwt_keys, &http_req).await {
        Ok(response) => {
            info!("Token refreshed for {}", response.user.email);
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            warn!("Token refresh failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_refresh(
    request: RefreshRequest,
    pool: &AppState,
    config: &AppConfig,
    jwt_keys: &JwtKeys,
    http_req: &HttpRequest,
) -> Result<RefreshResponse, RefreshError> {
    let ip_address = extract_ip_address(http_req);
    let user_agent = extract_user_agent(http_req);
    let audit_service = AuditService::new(pool.db.clone());
    let session_service = SessionService::new(pool.db.clone());

    let session = session_service
        .find_by_refresh_token(&request.refresh_token)
        .await
        .map_err(|e| RefreshError::DatabaseError(e.to_string()))?;

    let Some(session) = session else {
        audit_service
            .record(
                AuditEntry::failure("auth.refresh", "session", "unknown refresh token")
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(RefreshError::InvalidToken);
    };

    // A token that resolves to a revoked session was already rotated away or
    // logged out; treat presentation as reuse and say so in the audit trail.
    if !session.is_active {
        audit_service
            .record(
                AuditEntry::failure("auth.refresh", "session", "refresh token reuse")
                    .user(session.user_id)
                    .resource(session.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(RefreshError::InvalidToken);
    }

    if session.is_expired() {
        session_service
            .revoke_session(session.user_id, session.id)
            .await
            .map_err(|e| RefreshError::DatabaseError(e.to_string()))?;
        audit_service
            .record(
                AuditEntry::failure("auth.refresh", "session", "refresh token expired")
                    .user(session.user_id)
                    .resource(session.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(RefreshError::InvalidToken);
    }

    let mut conn = pool
        .db
        .get()
        .map_err(|e| RefreshError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::id.eq(session.user_id))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| RefreshError::DatabaseError(e.to_string()))?
        .ok_or(RefreshError::InvalidToken)?;

    if !user.is_active {
        audit_service
            .record(
                AuditEntry::failure("auth.refresh", "session", "account disabled")
                    .user(user.id)
                    .resource(session.id)
                    .client(&ip_address, &user_agent),
            )
            .await;
        return Err(RefreshError::AccountDisabled);
    }

    let (access_token, jti) = jwt_keys
        .generate_access_token(user.id, &user.email, user.role)
        .map_err(|e| RefreshError::TokenError(e.to_string()))?;

    // Rotation: the presented refresh token dies here, the session row keeps
    // living with a fresh token and a pushed-out expiry.
    let (session, new_refresh_token) = session_service
        .rotate_session(
            session.id,
            jti,
            Duration::seconds(config.jwt.refresh_token_expiry as i64),
        )
        .await
        .map_err(|e| RefreshError::DatabaseError(e.to_string()))?;

    audit_service
        .record(
            AuditEntry::success("auth.refresh", "session")
                .user(user.id)
                .resource(session.id)
                .client(&ip_address, &user_agent),
        )
        .await;

    Ok(RefreshResponse {
        user: UserProfile::from(&user),
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_keys.access_token_expiry_secs(),
        refresh_token: new_refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_answers_unauthorized() {
        assert_eq!(
            RefreshError::InvalidToken.to_http_response().status(),
            actix_web::http::StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn disabled_account_answers_unauthorized() {
        assert_eq!(
            RefreshError::AccountDisabled.to_http_response().status(),
            actix_web::http::StatusCode::UNAUTHORIZED
        );
    }
}
