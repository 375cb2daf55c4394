use actix_web::{delete, get, web, web::Data, HttpRequest, HttpResponse, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    db::AppState,
    middleware::{extract_ip_address, extract_user_agent, request_claims},
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
};

#[derive(Error, Debug)]
pub enum SessionsError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl SessionsError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            SessionsError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_token",
                "message": "Invalid or missing authentication token"
            })),
            SessionsError::SessionNotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "session_not_found",
                "message": "Session not found or already revoked"
            })),
            SessionsError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// True for the session behind the presented access token.
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// List the caller's active sessions, newest first.
#[get("/sessions")]
pub async fn list_sessions(
    query: web::Query<SessionListQuery>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_list_sessions(query.into_inner(), &pool, &http_req).await {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => {
            warn!("Session listing failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_list_sessions(
    query: SessionListQuery,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<SessionListResponse, SessionsError> {
    let claims = request_claims(http_req).ok_or(SessionsError::InvalidToken)?;
    let user_id = claims.user_id().map_err(|_| SessionsError::InvalidToken)?;
    let current_jti = claims.token_id().map_err(|_| SessionsError::InvalidToken)?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    let session_service = SessionService::new(pool.db.clone());
    let sessions = session_service
        .list_active(user_id, page, per_page)
        .await
        .map_err(|e| SessionsError::DatabaseError(e.to_string()))?;
    let total = session_service
        .count_active(user_id)
        .await
        .map_err(|e| SessionsError::DatabaseError(e.to_string()))?;

    Ok(SessionListResponse {
        sessions: sessions
            .into_iter()
            .map(|s| SessionInfo {
                id: s.id,
                ip_address: s.ip_address,
                user_agent: s.user_agent,
                created_at: s.created_at,
                last_activity: s.last_activity,
                expires_at: s.expires_at,
                current: s.access_token_jti == current_jti,
            })
            .collect(),
        total,
        page,
        per_page,
    })
}

/// Revoke one of the caller's own sessions.
#[delete("/sessions/{session_id}")]
pub async fn revoke_session(
    path: web::Path<Uuid>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_revoke_session(path.into_inner(), &pool, &http_req).await {
        Ok(response) => {
            info!("Session revoked");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            warn!("Session revocation failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_revoke_session(
    session_id: Uuid,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<serde_json::Value, SessionsError> {
    let claims = request_claims(http_req).ok_or(SessionsError::InvalidToken)?;
    let user_id = claims.user_id().map_err(|_| SessionsError::InvalidToken)?;

    let session_service = SessionService::new(pool.db.clone());
    let revoked = session_service
        .revoke_session(user_id, session_id)
        .await
        .map_err(|e| SessionsError::DatabaseError(e.to_string()))?;

    // Foreign sessions answer the same 404 as absent ones, so session ids
    // cannot be probed across users.
    if !revoked {
        return Err(SessionsError::SessionNotFound);
    }

    let audit_service = AuditService::new(pool.db.clone());
    audit_service
        .record(
            AuditEntry::success("auth.session_revoked", "session")
                .user(user_id)
                .resource(session_id)
                .client(
                    &extract_ip_address(http_req),
                    &extract_user_agent(http_req),
                ),
        )
        .await;

    Ok(serde_json::json!({
        "message": "Session revoked successfully",
        "session_id": session_id
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_answers_not_found() {
        assert_eq!(
            SessionsError::SessionNotFound.to_http_response().status(),
            actix_web::http::StatusCode::NOT_FOUND
        );
    }
}
