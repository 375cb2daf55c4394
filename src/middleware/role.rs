use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorForbidden,
    Error, HttpMessage,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::db::model::UserRole;
use crate::utils::jwt::Claims;

/// Role guard; must run inside an [`super::AuthMiddleware`] scope so the
/// access-token claims are already in the request extensions.
pub struct RoleMiddleware {
    required_role: UserRole,
}

impl RoleMiddleware {
    pub fn new(required_role: UserRole) -> Self {
        Self { required_role }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RoleMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RoleMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RoleMiddlewareService {
            service: Rc::new(service),
            required_role: self.required_role,
        }))
    }
}

pub struct RoleMiddlewareService<S> {
    service: Rc<S>,
    required_role: UserRole,
}

impl<S, B> Service<ServiceRequest> for RoleMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let required_role = self.required_role;

        Box::pin(async move {
            let role = req
                .extensions()
                .get::<Claims>()
                .map(|claims| claims.role.clone())
                .ok_or_else(|| ErrorForbidden("Not authenticated"))?;

            let role: UserRole = role
                .parse()
                .map_err(|_| ErrorForbidden("Unrecognized role"))?;

            if role != required_role {
                return Err(ErrorForbidden("Insufficient permissions"));
            }

            let res = svc.call(req).await?;
            Ok(res)
        })
    }
}
