use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;

use crate::db::AppState;

#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let db_status = match state.db.get() {
        Ok(_) => "healthy",
        Err(e) => {
            log::error!("Database connection error: {}", e);
            "unhealthy"
        }
    };

    let response = json!({
        "status": db_status,
        "service": "hr-auth-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": {
            "database": db_status
        }
    });

    if db_status == "healthy" {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
