use crate::{
    auth::auth_middleware,
    handlers,
    middleware::{cors_layer, request_id_layer, trace_layer},
    quota::quota_middleware,
    state::AppState,
};
use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;

/// Health check route; never rejected, never metered
pub const PING: &str = "api.ping";
pub const DATABASE_LIST: &str = "api.geocode.database";

const PING_PATH: &str = "/ping";
const DATABASE_LIST_PATH: &str = "/geocode/getDatabaseList";

/// Route names by path pattern. Quota actions derive from these names.
const ROUTES: [(&str, &str); 2] = [(PING_PATH, PING), (DATABASE_LIST_PATH, DATABASE_LIST)];

/// Name of the route registered under `path`
pub fn route_name(path: &str) -> Option<&'static str> {
    ROUTES
        .iter()
        .find(|(pattern, _)| *pattern == path)
        .map(|(_, name)| *name)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(PING_PATH, get(handlers::ping))
        .route(DATABASE_LIST_PATH, get(handlers::database_list))
        .layer(
            ServiceBuilder::new()
                // Request tracing
                .layer(trace_layer())
                // Request ID
                .layer(request_id_layer())
                // CORS
                .layer(cors_layer(&state.config))
                // Authentication, then quota
                .layer(from_fn_with_state(state.clone(), auth_middleware))
                .layer(from_fn_with_state(state.clone(), quota_middleware)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_name() {
        assert_eq!(route_name("/ping"), Some(PING));
        assert_eq!(route_name("/geocode/getDatabaseList"), Some(DATABASE_LIST));
        assert_eq!(route_name("/nope"), None);
    }
}
