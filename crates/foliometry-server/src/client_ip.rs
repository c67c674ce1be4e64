use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

/// Prefix Node-style dual-stack sockets put in front of IPv4 peers.
const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// Peer address of the TCP connection, if the server was started with
/// `into_make_service_with_connect_info`.
///
/// Unlike `ConnectInfo<SocketAddr>` this extractor never rejects, so routers
/// built without connect-info (tests, `oneshot`) still work.
#[derive(Debug, Clone, Copy)]
pub struct MaybeConnectInfo(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for MaybeConnectInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// Best-effort originating client address.
///
/// With `trust_proxy`, the left-most `X-Forwarded-For` entry wins. Otherwise
/// the transport peer is used with any `::ffff:` prefix removed. Returns an
/// empty string when neither is available; callers treat that as unknown.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty());
        if let Some(chain) = forwarded {
            return chain.split(',').next().unwrap_or_default().trim().to_string();
        }
    }

    peer.map(|addr| {
        let ip = addr.ip().to_string();
        ip.strip_prefix(IPV4_MAPPED_PREFIX)
            .map(str::to_string)
            .unwrap_or(ip)
    })
    .unwrap_or_default()
}
