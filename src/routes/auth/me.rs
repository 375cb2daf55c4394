use actix_web::{get, web::Data, HttpRequest, HttpResponse, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper};
use log::{error, info};
use serde::Serialize;
use thiserror::Error;

use crate::{
    db::{model::User, schema::users, AppState},
    middleware::request_claims,
};

use super::UserProfile;

#[derive(Error, Debug)]
pub enum MeError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found")]
    UserNotFound,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl MeError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            MeError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_token",
                "message": "Invalid or missing authentication token"
            })),
            MeError::UserNotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "user_not_found",
                "message": "User account not found"
            })),
            MeError::DatabaseError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An error occurred while processing your request"
                }))
            }
        }
    }
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
}

#[get("/me")]
pub async fn get_current_user(req: HttpRequest, pool: Data<AppState>) -> Result<HttpResponse> {
    match handle_me(&req, &pool).await {
        Ok(response) => {
            info!("User profile retrieved");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            error!("User profile retrieval failed: {}", e);
            Ok(e.to_http_response())
        }
    }
}

async fn handle_me(req: &HttpRequest, pool: &AppState) -> Result<MeResponse, MeError> {
    let claims = request_claims(req).ok_or(MeError::InvalidToken)?;
    let user_id = claims.user_id().map_err(|_| MeError::InvalidToken)?;

    let mut conn = pool
        .db
        .get()
        .map_err(|e| MeError::DatabaseError(e.to_string()))?;

    let user = users::table
        .filter(users::id.eq(user_id))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(|e| MeError::DatabaseError(e.to_string()))?
        .ok_or(MeError::UserNotFound)?;

    Ok(MeResponse {
        user: UserProfile::from(&user),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_answers_not_found() {
        assert_eq!(
            MeError::UserNotFound.to_http_response().status(),
            actix_web::http::StatusCode::NOT_FOUND
        );
    }
}
