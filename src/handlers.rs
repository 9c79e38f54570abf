// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the MTA-STS responder.
//!
//! The router is transport-agnostic: the same [`router`] is served over
//! plain HTTP or over gated TLS.

use crate::sts::{PolicyProvider, WELL_KNOWN_PATH};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub provider: PolicyProvider,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Build the responder's router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(WELL_KNOWN_PATH, get(mta_sts_policy))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "mta-sts-bastion",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Serve the policy document. GET and HEAD both land here.
///
/// Always 200: a failed upstream fetch is served as an empty body.
pub async fn mta_sts_policy(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
    };
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    info!(
        remote_addr = %remote_addr,
        host = %header_str(header::HOST),
        user_agent = %header_str(header::USER_AGENT),
        "Policy requested"
    );

    let body = state.provider.document().await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sts::{StsMode, StsPolicy};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn local_app() -> Router {
        router(Arc::new(AppState {
            provider: PolicyProvider::local(&StsPolicy {
                mode: StsMode::Enforce,
                max_age: 604800,
                mx: vec!["mx.example.com".to_string()],
            }),
        }))
    }

    #[tokio::test]
    async fn test_get_policy() {
        let response = local_app()
            .oneshot(
                Request::builder()
                    .uri(WELL_KNOWN_PATH)
                    .header(header::HOST, "mta-sts.example.com")
                    .header(header::USER_AGENT, "test-mta/1.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            &body[..],
            b"version: STSv1\r\nmode: enforce\r\nmax_age: 604800\r\nmx: mx.example.com\r\n"
        );
    }

    #[tokio::test]
    async fn test_head_policy() {
        let response = local_app()
            .oneshot(
                Request::builder()
                    .method(Method::HEAD)
                    .uri(WELL_KNOWN_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_other_paths_not_found() {
        for uri in ["/", "/.well-known/mta-sts", "/.well-known/mta-sts.txt/extra"] {
            let response = local_app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_health() {
        let response = local_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["service"], "mta-sts-bastion");
    }
}
