use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;
use crate::flows::AuthFlows;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
    database: String,
}

fn status_label(healthy: bool) -> String {
    if healthy { "ok" } else { "error" }.to_string()
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Throttle store and database are healthy", body = [Health]),
        (status = 503, description = "Throttle store or database is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, flows: Extension<Arc<AuthFlows>>) -> impl IntoResponse {
    let store = match flows.engine().store().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping throttle store: {err:#}");
            false
        }
    };

    let database = match flows.accounts().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err:#}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: status_label(store),
        database: status_label(database),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if store && database {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
