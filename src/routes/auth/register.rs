use actix_web::{post, web, web::Data, HttpRequest, HttpResponse, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{error, info};
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
    middleware::{extract_ip_address, extract_user_agent},
    services::audit::{AuditEntry, AuditService},
    utils::password::PasswordService,
};

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("User with email '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Failed to create user: {0}")]
    UserCreationFailed(String),
}

impl RegistrationError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            RegistrationError::ValidationFailed(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "validation_failed",
                    "message": msg
                }))
            }
            RegistrationError::UserAlreadyExists(_) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "user_already_exists",
                    "message": self.to_string()
                }))
            }
            RegistrationError::DatabaseError(_) | RegistrationError::UserCreationFailed(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub password: String,
    pub employee_id: Option<Uuid>,
}

#[post("")]
pub async fn register_user(
    request: web::Json<RegisterRequest>,
    pool: Data<AppState>,
    http_req: HttpRequest,
) -> Result<HttpResponse> {
    info!("Registration attempt for {}", request.email);

    match handle_registration(request.into_inner(), &pool, &http_req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("Registration failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_registration(
    request: RegisterRequest,
    pool: &AppState,
    http_req: &HttpRequest,
) -> Result<HttpResponse, RegistrationError> {
    request
        .validate()
        .map_err(|e| RegistrationError::ValidationFailed(e.to_string()))?;

    PasswordService::validate_password_strength(&request.password)
        .map_err(|errors| RegistrationError::ValidationFailed(errors.join("; ")))?;

    let email = request.email.trim().to_lowercase();

    let mut conn = pool
        .db
        .get()
        .map_err(|e| RegistrationError::DatabaseError(e.to_string()))?;

    let existing = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| RegistrationError::DatabaseError(e.to_string()))?;

    if existing.is_some() {
        return Err(RegistrationError::UserAlreadyExists(email));
    }

    let password_hash = PasswordService::hash_password(&request.password)
        .map_err(|e| RegistrationError::UserCreationFailed(e.to_string()))?;

    // Self-service registration always produces an Employee account; other
    // roles are assigned through the admin surface.
    let new_user = NewUser {
        email: &email,
        password_hash: &password_hash,
        role: UserRole::Employee,
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
            ) => RegistrationError::UserAlreadyExists(email.clone()),
            other => RegistrationError::UserCreationFailed(other.to_string()),
        })?;

    let audit_service = AuditService::new(pool.db.clone());
    audit_service
        .record(
            AuditEntry::success("auth.register", "user")
                .user(user.id)
                .resource(user.id)
                .client(
                    &extract_ip_address(http_req),
                    &extract_user_agent(http_req),
                ),
        )
        .await;

    info!("User registered successfully: {}", user.email);

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "User registered successfully",
        "user": super::UserProfile::from(&user)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rejects_bad_email_and_short_password() {
        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            password: "LongEnough1".to_string(),
            employee_id: None,
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest {
            email: "new.hire@example.com".to_string(),
            password: "Short1".to_string(),
            employee_id: None,
        };
        assert!(short_password.validate().is_err());

        let ok = RegisterRequest {
            email: "new.hire@example.com".to_string(),
            password: "LongEnough1".to_string(),
            employee_id: Some(Uuid::new_v4()),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn duplicate_email_maps_to_conflict() {
        let response =
            RegistrationError::UserAlreadyExists("hr@example.com".to_string()).to_http_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::CONFLICT);
    }

    #[test]
    fn internal_errors_stay_generic() {
        let response =
            RegistrationError::DatabaseError("connection refused".to_string()).to_http_response();
        assert_eq!(
            response.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
