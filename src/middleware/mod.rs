use actix_web::HttpRequest;

pub mod auth;
pub mod logging;
pub mod rate_limit;
pub mod role;

// Re-export middleware types and constructors
pub use auth::{request_claims, AuthMiddleware};
pub use rate_limit::RateLimitMiddleware;
pub use role::RoleMiddleware;

/// Extract real IP address from HTTP request
pub fn extract_ip_address(req: &HttpRequest) -> String {
    // Try X-Forwarded-For header first (for proxies/load balancers)
    if let Some(x_forwarded_for) = req.headers().get("x-forwarded-for") {
        if let Ok(xff_str) = x_forwarded_for.to_str() {
            // X-Forwarded-For can contain multiple IPs, take the first one
            if let Some(first_ip) = xff_str.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    // Try X-Real-IP header (commonly used by nginx)
    if let Some(x_real_ip) = req.headers().get("x-real-ip") {
        if let Ok(ip_str) = x_real_ip.to_str() {
            let ip = ip_str.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    // Fall back to connection info
    req.connection_info()
        .peer_addr()
        .unwrap_or("0.0.0.0")
        .to_string()
}

/// Extract User-Agent from HTTP request
pub fn extract_user_agent(req: &HttpRequest) -> String {
    req.headers()
        .get("user-agent")
        .and_then(|ua| ua.to_str().ok())
        .unwrap_or("Unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "203.0.113.7, 10.0.0.1"))
            .insert_header(("x-real-ip", "192.0.2.1"))
            .to_http_request();

        assert_eq!(extract_ip_address(&req), "203.0.113.7");
    }

    #[test]
    fn real_ip_used_when_no_forwarded_for() {
        let req = TestRequest::default()
            .insert_header(("x-real-ip", "192.0.2.1"))
            .to_http_request();

        assert_eq!(extract_ip_address(&req), "192.0.2.1");
    }

    #[test]
    fn missing_user_agent_is_unknown() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(extract_user_agent(&req), "Unknown");
    }
}
