use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorTooManyRequests,
    Error,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter per client IP. State is per worker, which is enough
/// to blunt credential stuffing without a shared store.
#[derive(Debug)]
pub struct FixedWindow {
    max_requests: u32,
    window: Duration,
    entries: HashMap<String, RateLimitEntry>,
}

impl FixedWindow {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: HashMap::new(),
        }
    }

    /// Returns true when the request is within the limit.
    fn check(&mut self, key: &str, now: Instant) -> bool {
        // Drop entries whose window has long passed to bound memory
        let window = self.window;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window * 2);

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            return false;
        }

        entry.count += 1;
        true
    }
}

pub struct RateLimitMiddleware {
    storage: Rc<Mutex<FixedWindow>>,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window_duration: Duration) -> Self {
        Self {
            storage: Rc::new(Mutex::new(FixedWindow::new(max_requests, window_duration))),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            storage: self.storage.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    storage: Rc<Mutex<FixedWindow>>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        let storage = self.storage.clone();

        Box::pin(async move {
            let client_ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("0.0.0.0")
                .to_string();

            let allowed = {
                let mut window = storage.lock().unwrap();
                window.check(&client_ip, Instant::now())
            };

            if !allowed {
                return Err(ErrorTooManyRequests("Rate limit exceeded"));
            }

            let res = svc.call(req).await?;
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let mut window = FixedWindow::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert!(window.check("203.0.113.7", now));
        assert!(window.check("203.0.113.7", now));
        assert!(window.check("203.0.113.7", now));
        assert!(!window.check("203.0.113.7", now));
    }

    #[test]
    fn window_resets_after_duration() {
        let mut window = FixedWindow::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(window.check("203.0.113.7", start));
        assert!(!window.check("203.0.113.7", start + Duration::from_secs(30)));
        assert!(window.check("203.0.113.7", start + Duration::from_secs(61)));
    }

    #[test]
    fn clients_are_counted_independently() {
        let mut window = FixedWindow::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(window.check("203.0.113.7", now));
        assert!(window.check("198.51.100.2", now));
        assert!(!window.check("203.0.113.7", now));
    }
}
