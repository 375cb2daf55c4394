use actix_web::{post, web::Data, HttpRequest, HttpResponse, Result};
use log::{error, info};
use serde::Serialize;
use thiserror::Error;

use crate::{
    db::AppState,
    middleware::{extract_ip_address, extract_user_agent, request_claims},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
};

#[derive(Error, Debug)]
pub enum LogoutError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl LogoutError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            LogoutError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_token",
                "message": "Invalid or missing authentication token"
            })),
            LogoutError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub message: String,
    pub revoked_count: u64,
}

/// End the current session. The session is resolved through the access
/// token's jti, which the login/refresh path stamped onto the session row.
#[post("/logout")]
pub async fn logout_user(req: HttpRequest, pool: Data<AppState>) -> Result<HttpResponse> {
    match handle_logout(&req, &pool).await {
        Ok(response) => {
            info!("Logout successful");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            error!("Logout failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_logout(req: &HttpRequest, pool: &AppState) -> Result<LogoutResponse, LogoutError> {
    let claims = request_claims(req).ok_or(LogoutError::InvalidToken)?;
    let user_id = claims.user_id().map_err(|_| LogoutError::InvalidToken)?;
    let jti = claims.token_id().map_err(|_| LogoutError::InvalidToken)?;

    let session_service = SessionService::new(pool.db.clone());
    let revoked = session_service
        .revoke_by_jti(user_id, jti)
        .await
        .map_err(|e| LogoutError::DatabaseError(e.to_string()))?;

    // Logging out an already-dead session is not an error; acknowledge it.
    if revoked {
        let audit_service = AuditService::new(pool.db.clone());
        audit_service
            .record(
                AuditEntry::success("auth.logout", "session")
                    .user(user_id)
                    .client(&extract_ip_address(req), &extract_user_agent(req)),
            )
            .await;
    }

    Ok(LogoutResponse {
        message: "Successfully logged out".to_string(),
    })
}

/// End every active session of the caller.
#[post("/logout-all")]
pub async fn logout_all(req: HttpRequest, pool: Data<AppState>) -> Result<HttpResponse> {
    match handle_logout_all(&req, &pool).await {
        Ok(response) => {
            info!("Logout-all revoked {} sessions", response.revoked_count);
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            error!("Logout-all failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_logout_all(
    req: &HttpRequest,
    pool: &AppState,
) -> Result<LogoutAllResponse, LogoutError> {
    let claims = request_claims(req).ok_or(LogoutError::InvalidToken)?;
    let user_id = claims.user_id().map_err(|_| LogoutError::InvalidToken)?;

    let session_service = SessionService::new(pool.db.clone());
    let revoked_count = session_service
        .revoke_all(user_id)
        .await
        .map_err(|e| LogoutError::DatabaseError(e.to_string()))?;

    let audit_service = AuditService::new(pool.db.clone());
    audit_service
        .record(
            AuditEntry::success("auth.logout_all", "session")
                .user(user_id)
                .changes(serde_json::json!({ "revoked_count": revoked_count }))
                .client(&extract_ip_address(req), &extract_user_agent(req)),
        )
        .await;

    Ok(LogoutAllResponse {
        message: "All sessions logged out".to_string(),
        revoked_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_claims_answer_unauthorized() {
        assert_eq!(
            LogoutError::InvalidToken.to_http_response().status(),
            actix_web::http::StatusCode::UNAUTHORIZED
        );
    }
}
