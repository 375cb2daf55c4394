use actix_web::{get, web, web::Data, HttpResponse, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    db::AppState,
    services::audit::{AuditLogResponse, AuditService},
};

#[derive(Error, Debug)]
pub enum AuditQueryError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AuditQueryError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            AuditQueryError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub action: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogListResponse {
    pub logs: Vec<AuditLogResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Read-only audit trail for compliance review; there is no write surface.
#[get("/audit-logs")]
pub async fn list_audit_logs(
    query: web::Query<AuditLogQuery>,
    pool: Data<AppState>,
) -> Result<HttpResponse> {
    match handle_list_audit_logs(query.into_inner(), &pool).await {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => {
            warn!("Audit log query failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_list_audit_logs(
    query: AuditLogQuery,
    pool: &AppState,
) -> Result<AuditLogListResponse, AuditQueryError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 200);

    let audit_service = AuditService::new(pool.db.clone());

    let logs = audit_service
        .get_audit_logs(page, per_page, query.action.as_deref(), query.user_id)
        .await
        .map_err(|e| AuditQueryError::DatabaseError(e.to_string()))?;

    let total = audit_service
        .count_audit_logs(query.action.as_deref(), query.user_id)
        .await
        .map_err(|e| AuditQueryError::DatabaseError(e.to_string()))?;

    Ok(AuditLogListResponse {
        logs,
        total,
        page,
        per_page,
    })
}
