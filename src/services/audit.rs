use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::model::{AuditLog, AuditStatus, NewAuditLog};
use crate::db::schema::audit_logs;
use crate::db::DbPool;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn success(action: &str, resource_type: &str) -> Self {
        Self {
            user_id: None,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            ip_address: None,
            user_agent: None,
            changes: None,
            status: AuditStatus::Success,
            error_message: None,
        }
    }

    pub fn failure(action: &str, resource_type: &str, error_message: &str) -> Self {
        Self {
            user_id: None,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            ip_address: None,
            user_agent: None,
            changes: None,
            status: AuditStatus::Failure,
            error_message: Some(error_message.to_string()),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn client(mut self, ip_address: &str, user_agent: &str) -> Self {
        self.ip_address = Some(ip_address.to_string());
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = Some(changes);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(row: AuditLog) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            changes: row.changes,
            status: row.status,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

/// Append-only writer and reader for audit_logs. There is intentionally no
/// update or delete path anywhere in this service.
#[derive(Clone)]
pub struct AuditService {
    db_pool: DbPool,
}

impl AuditService {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    /// Best-effort append. A failed audit write must never fail the business
    /// operation, so errors are logged and swallowed.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.insert(&entry).await {
            error!("Failed to write audit record for '{}': {}", entry.action, e);
        }
    }

    async fn insert(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut conn = self
            .db_pool
            .get()
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        let new_row = NewAuditLog {
            user_id: entry.user_id,
            action: &entry.action,
            resource_type: &entry.resource_type,
            resource_id: entry.resource_id.as_deref(),
            ip_address: entry.ip_address.as_deref(),
            user_agent: entry.user_agent.as_deref(),
            changes: entry.changes.clone(),
            status: entry.status,
            error_message: entry.error_message.as_deref(),
        };

        diesel::insert_into(audit_logs::table)
            .values(&new_row)
            .execute(&mut conn)
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Get audit logs with pagination and filters, newest first
    pub async fn get_audit_logs(
        &self,
        page: i64,
        per_page: i64,
        action_filter: Option<&str>,
        user_id_filter: Option<Uuid>,
    ) -> Result<Vec<AuditLogResponse>, AuditError> {
        let mut conn = self
            .db_pool
            .get()
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        let offset = (page - 1) * per_page;
        let mut query = audit_logs::table.into_boxed();

        if let Some(action) = action_filter {
            query = query.filter(audit_logs::action.eq(action));
        }

        if let Some(uid) = user_id_filter {
            query = query.filter(audit_logs::user_id.eq(uid));
        }

        let rows = query
            .order(audit_logs::created_at.desc())
            .limit(per_page)
            .offset(offset)
            .load::<AuditLog>(&mut conn)
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(AuditLogResponse::from).collect())
    }

    /// Get total count of audit logs with filters
    pub async fn count_audit_logs(
        &self,
        action_filter: Option<&str>,
        user_id_filter: Option<Uuid>,
    ) -> Result<i64, AuditError> {
        let mut conn = self
            .db_pool
            .get()
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        let mut query = audit_logs::table.into_boxed();

        if let Some(action) = action_filter {
            query = query.filter(audit_logs::action.eq(action));
        }

        if let Some(uid) = user_id_filter {
            query = query.filter(audit_logs::user_id.eq(uid));
        }

        let count = query
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(|e| AuditError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_the_optional_columns() {
        let user_id = Uuid::new_v4();
        let entry = AuditEntry::success("auth.login", "session")
            .user(user_id)
            .resource("5f64")
            .client("203.0.113.7", "curl/8.0")
            .changes(serde_json::json!({"is_active": {"old": true, "new": false}}));

        assert_eq!(entry.user_id, Some(user_id));
        assert_eq!(entry.status, AuditStatus::Success);
        assert_eq!(entry.resource_id.as_deref(), Some("5f64"));
        assert_eq!(entry.ip_address.as_deref(), Some("203.0.113.7"));
        assert!(entry.changes.is_some());
        assert!(entry.error_message.is_none());
    }

    #[test]
    fn failure_carries_the_error_message() {
        let entry = AuditEntry::failure("auth.login", "session", "invalid credentials");

        assert_eq!(entry.status, AuditStatus::Failure);
        assert_eq!(entry.error_message.as_deref(), Some("invalid credentials"));
    }
}
