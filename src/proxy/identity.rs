use http::HeaderMap;
use std::net::SocketAddr;

/// Derive the client address: the first `X-Forwarded-For` element when
/// present (a trusted proxy in front), else `X-Real-IP`, else the TCP peer
/// with the port stripped.
pub fn client_addr(headers: &HeaderMap, peer_addr: SocketAddr) -> String {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    peer_addr.ip().to_string()
}

/// Extract the rate-limit identity: `Authorization: Bearer <k>` or
/// `Authorization: ApiKey <k>`, else `X-API-Key`, else the `api_key` query
/// parameter.
pub fn api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(auth) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        for scheme in ["bearer ", "apikey "] {
            if auth.len() > scheme.len() && auth[..scheme.len()].eq_ignore_ascii_case(scheme) {
                let token = auth[scheme.len()..].trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    if let Some(key) = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(key.to_string());
    }

    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            if name == "api_key" && !value.is_empty() {
                Some(value.to_string())
            } else {
                None
            }
        })
    })
}
