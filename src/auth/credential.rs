//! Request credentials and their verification.
//!
//! Two schemes are accepted:
//!
//! 1. **Signed token**: `Authorization: Bearer <jws>`, an HMAC-signed JWT
//!    whose `sub` is the consumer id. `iat`, `iss` and `sub` are required.
//! 2. **Shared secret**: `X-Geo6-Consumer`, `X-Geo6-Token` and
//!    `X-Geo6-Timestamp`. The token is a keyed digest over the consumer,
//!    timestamp, server host, HTTP method and normalized path.
//!
//! Both are bound to a five minute window around the issue timestamp.

use super::{context::RequestContext, error::AuthError};
use anyhow::Context;
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use hmac::{digest::InvalidLength, Hmac, Mac};
use http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const CONSUMER_HEADER: &str = "x-geo6-consumer";
pub const TOKEN_HEADER: &str = "x-geo6-token";
pub const TIMESTAMP_HEADER: &str = "x-geo6-timestamp";

/// Accepted drift between the issue timestamp and now, in seconds
pub const TIMESTAMP_WINDOW_SECS: i64 = 5 * 60;

pub const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Audience written into issued tokens
pub const TOKEN_AUDIENCE: &str = "GEO-6 API";

/// Consumer secrets double as the `k` member of an `oct` JWK, so the JWT
/// key is their base64url decoding. Padding and trailing bits are tolerated.
const JWK_KEY: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A credential presented by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    SharedSecret(SharedSecretToken),
    Signed(SignedToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecretToken {
    pub consumer: String,
    pub token: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: String,
    pub algorithm: Algorithm,
    pub issuer: String,
    pub subject: String,
    pub issued_at: i64,
}

/// Claims as read before the signature is checked; all optional so a
/// missing claim is reported by name.
#[derive(Debug, Deserialize)]
struct RawClaims {
    iat: Option<i64>,
    iss: Option<String>,
    sub: Option<String>,
}

/// Claims written by [`issue_signed_token`]
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub aud: String,
    pub iat: i64,
    pub iss: String,
    pub sub: String,
}

impl Credential {
    /// Read the credential from request headers. A bearer token wins over the
    /// `X-Geo6-*` headers when both are sent.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        if let Some(token) = extract_bearer_token(headers) {
            return SignedToken::parse(token).map(Credential::Signed);
        }

        let consumer = header_str(headers, CONSUMER_HEADER);
        let token = header_str(headers, TOKEN_HEADER);
        let timestamp = header_str(headers, TIMESTAMP_HEADER);

        match (consumer, token, timestamp) {
            (None, None, None) => Err(AuthError::MalformedCredential(
                "expected a bearer token or X-Geo6 headers".to_string(),
            )),
            (Some(consumer), Some(token), Some(timestamp)) => {
                let timestamp = timestamp.trim().parse::<i64>().map_err(|_| {
                    AuthError::MalformedCredential(format!("invalid timestamp \"{timestamp}\""))
                })?;

                Ok(Credential::SharedSecret(SharedSecretToken {
                    consumer: consumer.to_string(),
                    token: token.trim().to_string(),
                    timestamp,
                }))
            }
            _ => Err(AuthError::MalformedCredential(
                "X-Geo6-Consumer, X-Geo6-Token and X-Geo6-Timestamp are all required".to_string(),
            )),
        }
    }

    pub fn consumer(&self) -> &str {
        match self {
            Credential::SharedSecret(token) => &token.consumer,
            Credential::Signed(token) => &token.subject,
        }
    }

    pub fn issued_at(&self) -> i64 {
        match self {
            Credential::SharedSecret(token) => token.timestamp,
            Credential::Signed(token) => token.issued_at,
        }
    }

    /// Check the credential against the consumer's secret.
    pub fn verify(&self, secret: &str, ctx: &RequestContext) -> Result<(), AuthError> {
        match self {
            Credential::SharedSecret(token) => token.verify(secret, ctx),
            Credential::Signed(token) => token.verify(secret),
        }
    }
}

impl SharedSecretToken {
    fn verify(&self, secret: &str, ctx: &RequestContext) -> Result<(), AuthError> {
        let presented = hex::decode(&self.token).map_err(|_| AuthError::InvalidSignature)?;
        // Only the lowercase spelling is a valid token.
        if hex::encode(&presented) != self.token {
            return Err(AuthError::InvalidSignature);
        }
        let message = signing_message(
            &self.consumer,
            self.timestamp,
            &ctx.host,
            ctx.method.as_str(),
            &normalize_path(&ctx.path),
        );

        let mut mac = keyed_digest(secret).map_err(|_| AuthError::InvalidSignature)?;
        mac.update(message.as_bytes());
        // constant-time
        mac.verify_slice(&presented)
            .map_err(|_| AuthError::InvalidSignature)
    }
}

impl SignedToken {
    /// Decode a compact JWS without checking its signature.
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let header = decode_header(token).map_err(|e| {
            AuthError::MalformedCredential(format!("undecodable bearer token ({e})"))
        })?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::MalformedCredential(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let mut validation = relaxed_validation(header.alg);
        validation.insecure_disable_signature_validation();

        let claims = decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| AuthError::MalformedCredential(format!("undecodable bearer token ({e})")))?
            .claims;

        Ok(Self {
            token: token.to_string(),
            algorithm: header.alg,
            issued_at: claims.iat.ok_or(AuthError::MissingClaim("iat"))?,
            issuer: claims.iss.ok_or(AuthError::MissingClaim("iss"))?,
            subject: claims.sub.ok_or(AuthError::MissingClaim("sub"))?,
        })
    }

    fn verify(&self, secret: &str) -> Result<(), AuthError> {
        let key = jwk_key(secret).map_err(|_| AuthError::InvalidSignature)?;
        let validation = relaxed_validation(self.algorithm);

        decode::<RawClaims>(
            &self.token,
            &DecodingKey::from_secret(&key),
            &validation,
        )
        .map(|_| ())
        .map_err(|_| AuthError::InvalidSignature)
    }
}

/// Validation limited to the signature: the time window is checked by
/// [`check_issued_at`] and the audience is informational.
fn relaxed_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Reject issue timestamps outside `now ± TIMESTAMP_WINDOW_SECS`.
pub fn check_issued_at(timestamp: i64, now: i64) -> Result<(), AuthError> {
    if timestamp < now - TIMESTAMP_WINDOW_SECS {
        return Err(AuthError::ExpiredTimestamp(timestamp));
    }
    if timestamp > now + TIMESTAMP_WINDOW_SECS {
        return Err(AuthError::FutureTimestamp(timestamp));
    }
    Ok(())
}

/// Reduce a request path to the part covered by the shared-secret token.
///
/// `/geocode/<letters>...` keeps `/geocode/<letters>`, `/xy`, `/latlng` and
/// `/zones` prefixes keep only the prefix, anything else is returned as is.
/// Matching ignores case but the original case is kept.
pub fn normalize_path(path: &str) -> String {
    const GEOCODE: &str = "/geocode/";

    if starts_with_ignore_case(path, GEOCODE) {
        let letters = path[GEOCODE.len()..]
            .bytes()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        if letters > 0 {
            return path[..GEOCODE.len() + letters].to_string();
        }
    }

    for prefix in ["/xy", "/latlng", "/zones"] {
        if starts_with_ignore_case(path, prefix) {
            return path[..prefix.len()].to_string();
        }
    }

    path.to_string()
}

fn starts_with_ignore_case(path: &str, prefix: &str) -> bool {
    path.len() >= prefix.len() && path.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn signing_message(consumer: &str, timestamp: i64, host: &str, method: &str, query: &str) -> String {
    format!("{consumer}__{timestamp}__{host}__{method}__{query}")
}

/// HMAC key for signed tokens issued to or by a consumer.
pub fn jwk_key(secret: &str) -> Result<Vec<u8>, base64::DecodeError> {
    JWK_KEY.decode(secret.trim())
}

fn keyed_digest(secret: &str) -> Result<HmacSha512, InvalidLength> {
    HmacSha512::new_from_slice(secret.as_bytes())
}

/// Compute the `X-Geo6-Token` value for a request.
pub fn sign_shared_secret(
    secret: &str,
    consumer: &str,
    timestamp: i64,
    host: &str,
    method: &str,
    path: &str,
) -> Result<String, InvalidLength> {
    let message = signing_message(consumer, timestamp, host, method, &normalize_path(path));
    let mut mac = keyed_digest(secret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Issue an HS512 bearer token for `consumer`, keyed like [`jwk_key`].
pub fn issue_signed_token(
    consumer: &str,
    secret: &str,
    issuer: &str,
    issued_at: i64,
) -> anyhow::Result<String> {
    let key = jwk_key(secret).context("Consumer secret is not base64url")?;
    let claims = TokenClaims {
        aud: TOKEN_AUDIENCE.to_string(),
        iat: issued_at,
        iss: issuer.to_string(),
        sub: consumer.to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(&key),
    )?;
    Ok(token)
}

/// Extract a bearer token from the `Authorization` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim_start().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
