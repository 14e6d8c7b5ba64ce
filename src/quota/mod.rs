pub mod tracker;

pub use tracker::{QuotaError, QuotaOutcome, QuotaRecord, QuotaTracker};

use crate::{
    auth::{context::RequestContext, AuthorizationResult},
    state::AppState,
    utils::ApiError,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Quota state handed to handlers, echoed back in debug mode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuotaContext {
    #[serde(flatten)]
    pub counts: QuotaRecord,
    pub debug: bool,
    pub error: Option<String>,
}

impl QuotaContext {
    fn unmetered(debug: bool) -> Self {
        Self {
            debug,
            ..Default::default()
        }
    }

    fn from_outcome(outcome: QuotaOutcome, debug: bool) -> Self {
        Self {
            counts: outcome.counts,
            debug,
            error: outcome.error.map(|e| e.to_string()),
        }
    }
}

/// Quota bucket for a route name.
///
/// `api.geocode.street.source` counts as `street`, `api.zones` as `zones`;
/// `xy` and `latlng` lookups share the `location` bucket.
pub fn action_for_route(route: &str) -> String {
    let mut segments = route.split('.').filter(|s| !s.is_empty());

    let mut action = segments.next().unwrap_or_default();
    if action == "api" {
        action = segments.next().unwrap_or_default();
    }
    if action == "geocode" {
        if let Some(kind) = segments.next() {
            action = kind;
        }
    }

    match action {
        "xy" | "latlng" => "location".to_string(),
        other => other.to_string(),
    }
}

/// Count the call against the consumer's daily budget.
///
/// Runs after [`crate::auth::auth_middleware`]. Only authenticated consumers
/// are metered to disk; the health check and unmatched paths are not
/// metered at all.
pub async fn quota_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let debug = state.config.debug;
    let ctx = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.clone(),
        None => RequestContext::from_request(&request, state.config.server.name.as_deref()),
    };

    let route = match ctx.route {
        Some(route) if !ctx.is_health_check() => route,
        _ => {
            request.extensions_mut().insert(QuotaContext::unmetered(debug));
            return Ok(next.run(request).await);
        }
    };

    let consumer = request
        .extensions()
        .get::<AuthorizationResult>()
        .map(|auth| auth.metered_consumer().to_string())
        .unwrap_or_default();
    let action = action_for_route(route);
    let limit = state.policies.limit(&consumer, &action);

    let outcome = state.quota.record(&consumer, &action, limit).await;
    debug!(%consumer, %action, counts = ?outcome.counts, "Call counted");

    if let Some(error) = &outcome.error {
        if !ctx.is_exempt(debug) {
            warn!(%consumer, %action, route, "Request rejected: {}", error);
            return Err(ApiError::rate_limit_error(error.to_string()));
        }
        warn!(%consumer, %action, route, "Quota failure ignored: {}", error);
    }

    request
        .extensions_mut()
        .insert(QuotaContext::from_outcome(outcome, debug));

    Ok(next.run(request).await)
}
