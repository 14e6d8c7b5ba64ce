use crate::routes;
use axum::{
    extract::{connect_info::Connected, ConnectInfo, MatchedPath, Request},
    serve::IncomingStream,
};
use http::{header, HeaderMap, Method};
use std::net::{IpAddr, SocketAddr};

/// Both ends of an accepted connection.
///
/// Installed with `into_make_service_with_connect_info::<PeerAddrs>()` so the
/// middleware can tell whether the caller is the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddrs {
    pub remote: SocketAddr,
    pub local: Option<SocketAddr>,
}

impl Connected<IncomingStream<'_>> for PeerAddrs {
    fn connect_info(target: IncomingStream<'_>) -> Self {
        Self {
            remote: target.remote_addr(),
            local: target.local_addr().ok(),
        }
    }
}

/// Everything the auth and quota layers need to know about a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Server host name the shared-secret token is bound to
    pub host: String,
    pub headers: HeaderMap,
    pub client_ip: Option<IpAddr>,
    pub server_ip: Option<IpAddr>,
    /// Name of the matched route, if any
    pub route: Option<&'static str>,
}

impl RequestContext {
    /// Capture the request context. `server_name` overrides the `Host`
    /// header when configured.
    pub fn from_request(request: &Request, server_name: Option<&str>) -> Self {
        let headers = request.headers().clone();

        let host = match server_name {
            Some(name) => name.to_string(),
            None => headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .or_else(|| request.uri().host())
                .map(strip_port)
                .unwrap_or_default()
                .to_string(),
        };

        let peers = request
            .extensions()
            .get::<ConnectInfo<PeerAddrs>>()
            .map(|ConnectInfo(peers)| *peers);

        let route = request
            .extensions()
            .get::<MatchedPath>()
            .and_then(|matched| routes::route_name(matched.as_str()));

        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            host,
            headers,
            client_ip: peers.map(|p| p.remote.ip()),
            server_ip: peers.and_then(|p| p.local).map(|addr| addr.ip()),
            route,
        }
    }

    /// Raw `Referer` header, empty when absent
    pub fn referer(&self) -> &str {
        self.headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    }

    /// True when the caller connected from the server's own address.
    pub fn is_local_call(&self) -> bool {
        matches!((self.client_ip, self.server_ip), (Some(client), Some(server)) if client == server)
    }

    pub fn is_health_check(&self) -> bool {
        self.route == Some(routes::PING)
    }

    /// Whether a failure on this request is downgraded to a warning.
    pub fn is_exempt(&self, debug: bool) -> bool {
        debug || self.is_local_call() || self.is_health_check()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:8080
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
