use http::StatusCode;
use std::fmt;

/// Request-path failure taxonomy. Each variant carries its downstream status
/// and its error-counter label; the proxy handler answers every branch with
/// a plain-text body matching the status reason phrase.
#[derive(Debug)]
pub enum GatewayError {
    NoRouteMatch,
    UpstreamNotFound(String),
    NoHealthyUpstream(String),
    RateLimited { tier: &'static str },
    ProxyError(String),
    ClientClosed,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatch => StatusCode::NOT_FOUND,
            GatewayError::UpstreamNotFound(_) | GatewayError::ProxyError(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::NoHealthyUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            // Nginx's non-standard "client closed request".
            GatewayError::ClientClosed => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Label in the error counter family. Rate-limit rejections and client
    /// aborts are never counted there.
    pub fn metric_label(&self) -> Option<&'static str> {
        match self {
            GatewayError::NoRouteMatch => Some("not_found"),
            GatewayError::UpstreamNotFound(_) => Some("upstream_not_found"),
            GatewayError::NoHealthyUpstream(_) => Some("no_healthy_upstream"),
            GatewayError::ProxyError(_) => Some("proxy_error"),
            GatewayError::RateLimited { .. } | GatewayError::ClientClosed => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NoRouteMatch => write!(f, "no route matched"),
            GatewayError::UpstreamNotFound(name) => write!(f, "upstream not found: {}", name),
            GatewayError::NoHealthyUpstream(name) => {
                write!(f, "no healthy target in upstream: {}", name)
            }
            GatewayError::RateLimited { tier } => write!(f, "rate limited ({})", tier),
            GatewayError::ProxyError(msg) => write!(f, "upstream error: {}", msg),
            GatewayError::ClientClosed => write!(f, "client closed request"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::NoRouteMatch.status(), 404);
        assert_eq!(GatewayError::UpstreamNotFound("x".into()).status(), 502);
        assert_eq!(GatewayError::NoHealthyUpstream("x".into()).status(), 503);
        assert_eq!(GatewayError::RateLimited { tier: "ip" }.status(), 429);
        assert_eq!(GatewayError::ProxyError("boom".into()).status(), 502);
        assert_eq!(GatewayError::ClientClosed.status().as_u16(), 499);
    }

    #[test]
    fn test_error_counter_exclusions() {
        assert_eq!(GatewayError::RateLimited { tier: "route" }.metric_label(), None);
        assert_eq!(GatewayError::ClientClosed.metric_label(), None);
        assert_eq!(
            GatewayError::ProxyError("x".into()).metric_label(),
            Some("proxy_error")
        );
    }
}
