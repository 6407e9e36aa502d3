pub mod admin;
pub mod games;
pub mod health;
pub mod rewards;
pub mod wallet;
pub mod withdrawals;

use axum::http::HeaderMap;
use std::net::IpAddr;

// behind a proxy the connect address is useless; trust the forwarding
// headers the gateway sets
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<IpAddr>().ok())
        })
}
