//! Client address extraction for login throttling.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address used to key the brute-force counter.
///
/// Each trusted proxy appends the address it received the request from, so
/// with `n` trusted hops the client is the `n`th entry from the right.
/// Anything further left was written by the client and is ignored. Without
/// trusted hops, or when the header is shorter than expected, the TCP peer
/// is used, and `"unknown"` if even that is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let hops = state.config.trusted_proxy_hops;
        if hops > 0
            && let Some(forwarded) = parts
                .headers
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            && let Some(hop) = forwarded_hop(forwarded, hops)
        {
            return Ok(ClientAddr(hop.to_string()));
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientAddr(peer))
    }
}

/// The `hops`th entry from the right of an `X-Forwarded-For` value.
fn forwarded_hop(header: &str, hops: usize) -> Option<&str> {
    header
        .rsplit(',')
        .map(str::trim)
        .nth(hops.checked_sub(1)?)
        .filter(|hop| !hop.is_empty())
}
