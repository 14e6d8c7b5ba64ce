use crate::{auth::AuthorizationResult, quota::QuotaContext};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::{json, Value};

/// Health check: echoes the authorization context and never fails.
pub async fn ping(Extension(auth): Extension<AuthorizationResult>) -> Json<Value> {
    Json(json!({
        "now": Utc::now().timestamp(),
        "token": auth,
    }))
}

/// Address and POI sources the caller may query
pub async fn database_list(
    Extension(auth): Extension<AuthorizationResult>,
    Extension(quota): Extension<QuotaContext>,
) -> Json<Value> {
    let data = json!({
        "address": auth.database.address,
        "poi": auth.database.poi,
    });

    respond(&auth, &quota, data)
}

/// Attach the token and quota context to a response body in debug mode.
pub fn respond(auth: &AuthorizationResult, quota: &QuotaContext, mut data: Value) -> Json<Value> {
    if let Value::Object(map) = &mut data {
        if auth.debug {
            map.insert("token".to_string(), json!(auth));
        }
        if quota.debug {
            map.insert("quota".to_string(), json!(quota));
        }
    }

    Json(data)
}
