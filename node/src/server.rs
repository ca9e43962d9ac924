// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::api::*;
use crate::errors::ApiError;
use axum::body::Body;
use axum::extract::{Query, Request as AxumRequest, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use experience_fabric::{Fabric, FabricStatus, SharedEnvelope, SubscriptionEvent};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

pub type SharedFabric = Arc<Fabric>;

async fn auth_guard(
    State(token): State<Arc<Option<String>>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

pub fn build_router(fabric: SharedFabric, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        // Producers
        .route("/v1/publish", post(publish))
        // Consumers
        .route("/v1/snapshot", get(snapshot))
        .route("/v1/since", get(since))
        .route("/v1/latest", get(latest))
        .route("/v1/subscribe", get(subscribe))
        // Admin
        .route("/v1/status", get(status))
        .route("/v1/modules/authorize", post(authorize))
        .route("/v1/modules/revoke", post(revoke))
        // Observability
        .route("/metrics", get(metrics_handler))
        .with_state(fabric);

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required");
        let auth_state = Arc::new(Some(token));
        app = app.layer(from_fn_with_state(auth_state, auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    app.layer(TraceLayer::new_for_http())
}

/// Publish blocks on fsync, so it runs off the async workers.
async fn publish(
    State(fabric): State<SharedFabric>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<SharedEnvelope>, ApiError> {
    let envelope = tokio::task::spawn_blocking(move || {
        fabric.publish(&req.module, &req.signal, req.payload)
    })
    .await??;
    Ok(Json(envelope))
}

async fn snapshot(
    State(fabric): State<SharedFabric>,
    Query(query): Query<LimitQuery>,
) -> Json<EnvelopesResponse> {
    Json(EnvelopesResponse {
        envelopes: fabric.snapshot(query.limit()),
    })
}

async fn since(
    State(fabric): State<SharedFabric>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<SinceResponse>, ApiError> {
    let limit = query.limit();
    if limit == 0 {
        return Err(ApiError::InvalidInput("limit must be greater than zero".to_string()));
    }
    let cursor = query.cursor;
    let envelopes = tokio::task::spawn_blocking(move || fabric.since_page(cursor, limit)).await??;

    let next_cursor = envelopes.last().map_or(cursor, |e| e.sequence);
    Ok(Json(SinceResponse {
        caught_up: envelopes.len() < limit,
        next_cursor,
        envelopes,
    }))
}

async fn latest(
    State(fabric): State<SharedFabric>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<EnvelopesResponse>, ApiError> {
    let limit = query.limit();
    let envelopes = tokio::task::spawn_blocking(move || fabric.latest(limit)).await??;
    Ok(Json(EnvelopesResponse { envelopes }))
}

/// Newline-delimited JSON: one envelope per line, then a terminal line.
async fn subscribe(State(fabric): State<SharedFabric>) -> Response {
    let subscription = fabric.subscribe();
    tracing::debug!(
        "HTTP subscriber {} attached at sequence {}",
        subscription.id(),
        subscription.last_delivered()
    );

    let lines = subscription.into_stream().map(|event| {
        let line = match event {
            SubscriptionEvent::Envelope(envelope) => serde_json::to_value(&*envelope)
                .unwrap_or_else(|e| json!({ "error": e.to_string() })),
            SubscriptionEvent::Overflow { last_delivered } => {
                json!({ "overflow": { "last_delivered": last_delivered } })
            }
            SubscriptionEvent::Closed => json!({ "closed": true }),
        };
        Ok::<_, Infallible>(format!("{line}\n"))
    });

    ([(CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(lines)).into_response()
}

async fn status(State(fabric): State<SharedFabric>) -> Json<FabricStatus> {
    Json(fabric.status())
}

async fn authorize(
    State(fabric): State<SharedFabric>,
    Json(req): Json<ModuleRequest>,
) -> Result<Json<ModulesResponse>, ApiError> {
    fabric.authorize(&req.module)?;
    Ok(Json(ModulesResponse {
        allowed_modules: fabric.allowed_modules(),
    }))
}

async fn revoke(
    State(fabric): State<SharedFabric>,
    Json(req): Json<ModuleRequest>,
) -> Json<ModulesResponse> {
    fabric.revoke(&req.module);
    Json(ModulesResponse {
        allowed_modules: fabric.allowed_modules(),
    })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
