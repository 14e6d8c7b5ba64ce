pub mod context;
pub mod credential;
pub mod error;
pub mod policy;

pub use context::{PeerAddrs, RequestContext};
pub use credential::Credential;
pub use error::AuthError;
pub use policy::{AccessPolicy, DatabaseGrants, PolicyStore};

use crate::{state::AppState, utils::ApiError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

/// Outcome of credential checks, before database grants are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// Consumer the credential claims to be, empty when none was presented
    pub consumer: String,
    pub timestamp: Option<i64>,
    pub error: Option<AuthError>,
}

/// Identity and grants attached to every request
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResult {
    pub debug: bool,
    pub consumer: String,
    pub database: DatabaseGrants,
    pub referer: String,
    pub timestamp: Option<i64>,
    /// Normalized path the shared-secret token covers
    pub query: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<AuthError>,
}

fn serialize_error<S: Serializer>(error: &Option<AuthError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.collect_str(error),
        None => serializer.serialize_none(),
    }
}

impl AuthorizationResult {
    /// Grants are only widened for authenticated consumers; everyone else
    /// gets the defaults.
    pub fn new(
        authentication: Authentication,
        ctx: &RequestContext,
        store: &PolicyStore,
        available_poi: &[String],
        debug: bool,
    ) -> Self {
        let grantee = if authentication.error.is_none() {
            authentication.consumer.as_str()
        } else {
            ""
        };

        Self {
            debug,
            database: store.resolve_database_grants(grantee, available_poi),
            consumer: authentication.consumer,
            referer: ctx.referer().to_string(),
            timestamp: authentication.timestamp,
            query: credential::normalize_path(&ctx.path),
            error: authentication.error,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.error.is_none() && !self.consumer.is_empty()
    }

    /// Consumer id to count calls against; empty unless authenticated.
    pub fn metered_consumer(&self) -> &str {
        if self.is_authenticated() {
            &self.consumer
        } else {
            ""
        }
    }
}

/// Parse and verify the request credential.
pub fn authenticate(ctx: &RequestContext, store: &PolicyStore, now: i64) -> Authentication {
    match Credential::from_headers(&ctx.headers) {
        Ok(credential) => Authentication {
            consumer: credential.consumer().to_string(),
            timestamp: Some(credential.issued_at()),
            error: check_access(ctx, &credential, store, now).err(),
        },
        Err(error) => Authentication {
            consumer: String::new(),
            timestamp: None,
            error: Some(error),
        },
    }
}

/// Policy checks in order: consumer, referer, ip, timestamp window, signature.
fn check_access(
    ctx: &RequestContext,
    credential: &Credential,
    store: &PolicyStore,
    now: i64,
) -> Result<(), AuthError> {
    let consumer = credential.consumer();
    let policy = store
        .lookup(consumer)
        .filter(|_| !consumer.is_empty())
        .ok_or_else(|| AuthError::UnknownConsumer(consumer.to_string()))?;

    let referer = ctx.referer();
    if !policy.allows_referer(referer_host(referer).as_deref()) {
        return Err(AuthError::UnauthorizedReferer(referer.to_string()));
    }

    if !policy.allows_ip(ctx.client_ip) {
        return Err(AuthError::UnauthorizedIp(ctx.client_ip));
    }

    credential::check_issued_at(credential.issued_at(), now)?;

    credential.verify(&policy.secret, ctx)
}

fn referer_host(referer: &str) -> Option<String> {
    url::Url::parse(referer)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

/// Authentication middleware
///
/// Attaches an [`AuthorizationResult`] and the [`RequestContext`] to the
/// request. Failures answer 403 unless debug mode is on, the caller is the
/// server itself, or the route is the health check; in those cases the
/// failure is only logged and carried in the result.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let debug = state.config.debug;
    let ctx = RequestContext::from_request(&request, state.config.server.name.as_deref());
    let authentication = authenticate(&ctx, &state.policies, Utc::now().timestamp());

    if let Some(error) = &authentication.error {
        if !ctx.is_exempt(debug) {
            warn!(
                consumer = %authentication.consumer,
                client_ip = ?ctx.client_ip,
                route = ?ctx.route,
                "Request rejected: {}",
                error
            );
            return Err(ApiError::authorization_error(error.to_string()));
        }
        warn!(
            consumer = %authentication.consumer,
            route = ?ctx.route,
            "Authentication failure ignored: {}",
            error
        );
    } else {
        debug!(consumer = %authentication.consumer, "Request authenticated");
    }

    let available_poi = match state.catalog.poi_sources().await {
        Ok(sources) => sources,
        Err(e) => {
            warn!("Failed to list POI sources, dropping POI grants: {:#}", e);
            Vec::new()
        }
    };

    let result = AuthorizationResult::new(authentication, &ctx, &state.policies, &available_poi, debug);

    request.extensions_mut().insert(result);
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}
