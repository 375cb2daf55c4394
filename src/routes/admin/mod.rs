use actix_web::web;

use crate::db::model::UserRole;
use crate::middleware::{AuthMiddleware, RoleMiddleware};

pub mod audit;
pub mod users;

pub fn configure_admin_routes(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware) {
    // Wraps run outside-in in reverse registration order: authentication
    // first, then the role check against the verified claims.
    cfg.service(
        web::scope("/admin")
            .wrap(RoleMiddleware::new(UserRole::Admin))
            .wrap(auth_middleware)
            .service(users::create_user)
            .service(users::deactivate_user)
            .service(audit::list_audit_logs),
    );
}
