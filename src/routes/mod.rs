use actix_web::web;

use crate::config::AppConfig;
use crate::middleware::AuthMiddleware;
use crate::utils::jwt::JwtKeys;

pub mod admin;
pub mod auth;
pub mod health;

pub fn config(cfg: &mut web::ServiceConfig, app_config: &AppConfig, jwt_keys: &JwtKeys) {
    cfg.service(health::health_check);

    auth::configure_auth_routes(
        cfg,
        AuthMiddleware::new(jwt_keys.clone()),
        &app_config.security,
    );
    admin::configure_admin_routes(cfg, AuthMiddleware::new(jwt_keys.clone()));
}
