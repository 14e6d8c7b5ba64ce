use crate::{
    auth::credential::{CONSUMER_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER},
    utils::Config,
};
use http::{header, HeaderName, HeaderValue, Method};
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// CORS middleware configuration
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.server.cors_origins;
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static(CONSUMER_HEADER),
            HeaderName::from_static(TOKEN_HEADER),
            HeaderName::from_static(TIMESTAMP_HEADER),
        ])
        .allow_origin(allow_origin)
}

/// Tags every request with an `x-request-id` header
pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Logs spans and responses at info level
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
