use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorUnauthorized,
    http::header,
    Error, HttpMessage, HttpRequest,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::utils::jwt::{Claims, JwtKeys};

/// Verifies the bearer access token and stores its claims in the request
/// extensions for downstream handlers and the role guard.
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_keys: JwtKeys,
}

impl AuthMiddleware {
    pub fn new(jwt_keys: JwtKeys) -> Self {
        Self { jwt_keys }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            jwt_keys: self.jwt_keys.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    jwt_keys: JwtKeys,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
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
        let jwt_keys = self.jwt_keys.clone();

        Box::pin(async move {
            // Extract token from Authorization header
            let token = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|auth_header| {
                    auth_header
                        .to_str()
                        .ok()
                        .and_then(|auth_str| auth_str.strip_prefix("Bearer "))
                });

            let token = match token {
                Some(token) => token,
                None => {
                    return Err(ErrorUnauthorized("Missing authorization token"));
                }
            };

            let token_data = jwt_keys
                .verify_access_token(token)
                .map_err(|_| ErrorUnauthorized("Invalid token"))?;

            req.extensions_mut().insert(token_data.claims);

            let res = svc.call(req).await?;
            Ok(res)
        })
    }
}

/// Claims stored by [`AuthMiddleware`]; `None` outside an authenticated scope.
pub fn request_claims(req: &HttpRequest) -> Option<Claims> {
    req.extensions().get::<Claims>().cloned()
}
