use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        model::{NewUser, User, UserRole},
        schema::users,
        AppState,
    },
    middleware::{extract_ip_address, extract_user_agent, request_claims},
    routes::auth::UserProfile,
    services::audit::{AuditEntry, AuditService},
    services::SessionService,
    utils::password::PasswordService,
};

#[derive(Error, Debug)]
pub enum AdminUserError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("User with email '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Cannot deactivate your own account")]
    SelfDeactivation,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AdminUserError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            AdminUserError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_token",
                "message": "Invalid or missing authentication token"
            })),
            AdminUserError::ValidationFailed(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "validation_failed",
                    "message": msg
                }))
            }
            AdminUserError::UserAlreadyExists(_) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "user_already_exists",
                    "message": self.to_string()
                }))
            }
            AdminUserError::UserNotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "user_not_found",
                "message": "User account not found"
            })),
            AdminUserError::SelfDeactivation => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "self_deactivation",
                    "message": self.to_string()
                }))
            }
            AdminUserError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub password: String,
    pub role: UserRole,
    pub employee_id: Option<Uuid>,
}

/// Admin user creation; the one place where non-Employee roles are handed
/// out.
#[post("/users")]
pub async fn create_user(
    request: web::Json<CreateUserRequest>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_create_user(request.into_inner(), &pool, &http_req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!("Admin user creation failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_create_user(
    request: CreateUserRequest,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<HttpResponse, AdminUserError> {
    let claims = request_claims(http_req).ok_or(AdminUserError::InvalidToken)?;
    let admin_id = claims
        .user_id()
        .map_err(|_| AdminUserError::InvalidToken)?;

    request
        .validate()
        .map_err(|e| AdminUserError::ValidationFailed(e.to_string()))?;

    PasswordService::validate_password_strength(&request.password)
        .map_err(|errors| AdminUserError::ValidationFailed(errors.join("; ")))?;

    let email = request.email.trim().to_lowercase();

    let mut conn = pool
        .db
        .get()
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?;

    let password_hash = PasswordService::hash_password(&request.password)
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?;

    let new_user = NewUser {
        email: &email,
        password_hash: &password_hash,
        role: request.role,
        employee_id: request.employee_id,
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result::<User>(&mut conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AdminUserError::UserAlreadyExists(email.clone()),
            other => AdminUserError::DatabaseError(other.to_string()),
        })?;

    let audit_service = AuditService::new(pool.db.clone());
    audit_service
        .record(
            AuditEntry::success("admin.user_created", "user")
                .user(admin_id)
                .resource(user.id)
                .changes(serde_json::json!({
                    "email": user.email,
                    "role": user.role.as_str(),
                    "employee_id": user.employee_id,
                }))
                .client(
                    &extract_ip_address(http_req),
                    &extract_user_agent(http_req),
                ),
        )
        .await;

    info!("Admin {} created user {}", admin_id, user.email);

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "User created successfully",
        "user": UserProfile::from(&user)
    })))
}

/// Soft-disable an account and sign it out everywhere.
#[post("/users/{user_id}/deactivate")]
pub async fn deactivate_user(
    path: web::Path<Uuid>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    match handle_deactivate_user(path.into_inner(), &pool, &http_req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!("Admin user deactivation failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_deactivate_user(
    target_user_id: Uuid,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<HttpResponse, AdminUserError> {
    let claims = request_claims(http_req).ok_or(AdminUserError::InvalidToken)?;
    let admin_id = claims
        .user_id()
        .map_err(|_| AdminUserError::InvalidToken)?;

    if admin_id == target_user_id {
        return Err(AdminUserError::SelfDeactivation);
    }

    let mut conn = pool
        .db
        .get()
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?;

    let target = users::table
        .filter(users::id.eq(target_user_id))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?
        .ok_or(AdminUserError::UserNotFound)?;

    let was_active = target.is_active;

    let user = diesel::update(users::table.filter(users::id.eq(target_user_id)))
        .set(users::is_active.eq(false))
        .returning(User::as_returning())
        .get_result::<User>(&mut conn)
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?;

    let session_service = SessionService::new(pool.db.clone());
    let revoked_count = session_service
        .revoke_all(target_user_id)
        .await
        .map_err(|e| AdminUserError::DatabaseError(e.to_string()))?;

    if was_active {
        let audit_service = AuditService::new(pool.db.clone());
        audit_service
            .record(
                AuditEntry::success("admin.user_deactivated", "user")
                    .user(admin_id)
                    .resource(target_user_id)
                    .changes(serde_json::json!({
                        "is_active": {"old": true, "new": false}
                    }))
                    .client(
                        &extract_ip_address(http_req),
                        &extract_user_agent(http_req),
                    ),
            )
            .await;
    }

    info!(
        "Admin {} deactivated user {} ({} sessions revoked)",
        admin_id, user.email, revoked_count
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "User deactivated",
        "user": UserProfile::from(&user),
        "sessions_revoked": revoked_count
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_validates_role_payloads() {
        let ok = CreateUserRequest {
            email: "payroll.lead@example.com".to_string(),
            password: "StrongEnough1".to_string(),
            role: UserRole::Hr,
            employee_id: None,
        };
        assert!(ok.validate().is_ok());

        let bad = CreateUserRequest {
            email: "broken".to_string(),
            password: "short".to_string(),
            role: UserRole::Employee,
            employee_id: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn self_deactivation_answers_bad_request() {
        assert_eq!(
            AdminUserError::SelfDeactivation.to_http_response().status(),
            actix_web::http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn role_deserializes_from_lowercase() {
        let request: CreateUserRequest = serde_json::from_value(serde_json::json!({
            "email": "manager@example.com",
            "password": "StrongEnough1",
            "role": "manager"
        }))
        .unwrap();
        assert_eq!(request.role, UserRole::Manager);
    }
}
