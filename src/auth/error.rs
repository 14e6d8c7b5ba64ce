use chrono::{DateTime, Utc};
use std::net::IpAddr;
use thiserror::Error;

/// Reasons a request fails authentication.
///
/// None of these are fatal: the auth middleware either turns them into a
/// 403 or, when an exemption applies, carries the message downstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing or malformed credential: {0}.")]
    MalformedCredential(String),

    #[error("Missing claim \"{0}\".")]
    MissingClaim(&'static str),

    #[error("Invalid consumer \"{0}\".")]
    UnknownConsumer(String),

    #[error("Unauthorized referer \"{0}\".")]
    UnauthorizedReferer(String),

    #[error("Unauthorized ip \"{}\".", display_ip(.0))]
    UnauthorizedIp(Option<IpAddr>),

    #[error("Expired token. Token timestamp is \"{}\".", display_timestamp(.0))]
    ExpiredTimestamp(i64),

    #[error("Invalid timestamp. Token timestamp is \"{}\".", display_timestamp(.0))]
    FutureTimestamp(i64),

    #[error("Invalid token.")]
    InvalidSignature,
}

fn display_ip(ip: &Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string()).unwrap_or_default()
}

fn display_timestamp(timestamp: &i64) -> String {
    DateTime::<Utc>::from_timestamp(*timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}
