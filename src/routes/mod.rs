mod heartbeat;
mod system;

use crate::middlewares::{RequestId, RequestIdLayer};
use crate::state::AppState;
use crate::transport::PeerAddr;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};
use std::time::Duration;
use tracing::Span;

pub fn build(state: AppState) -> Router {
    let listener = state.listener;
    Router::new()
        .route("/api/health", get(system::health))
        .route("/api/version", get(system::version))
        .route("/api/heartbeat", post(heartbeat::heartbeat))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<RequestId>()
                        .map(|it| it.to_string())
                        .unwrap_or_default();
                    let peer = request
                        .extensions()
                        .get::<ConnectInfo<PeerAddr>>()
                        .map(|it| it.0.to_string())
                        .unwrap_or_default();
                    tracing::debug_span!("request", request_id = %request_id, listener, peer = %peer)
                })
                .on_request(|req: &Request<Body>, _span: &Span| {
                    tracing::trace!(
                        method = %req.method(),
                        uri = %req.uri(),
                        "started processing request"
                    );
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::debug!(
                        status = %res.status().as_u16(),
                        latency = %format!("{}ms", latency.as_millis()),
                        "finished processing request"
                    );
                }),
        )
        .layer(RequestIdLayer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorBody;
    use crate::models::dtos::heartbeat::HeartbeatResponseDto;
    use crate::models::dtos::provisioning::{
        FirmwareTargetRequestDto, FirmwareTargetResponseDto, OsVersionNoticeDto,
    };
    use crate::models::{Md5Sum, NewGateway};
    use crate::services::provisioning::ProvisioningError;
    use crate::services::{EngineSettings, HeartbeatEngine, ProvisioningAuthority, RetryPolicy};
    use crate::store::SqliteGatewayStore;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::ServiceExt;

    const CONFIG: &str = "{\"region\":\"EU868\"}";

    struct NullAuthority;

    #[async_trait]
    impl ProvisioningAuthority for NullAuthority {
        async fn get_firmware_target(
            &self,
            _request: &FirmwareTargetRequestDto,
        ) -> Result<FirmwareTargetResponseDto, ProvisioningError> {
            Err(ProvisioningError::Timeout)
        }
        async fn notify_os_version(
            &self,
            _notice: &OsVersionNoticeDto,
        ) -> Result<(), ProvisioningError> {
            Ok(())
        }
    }

    async fn app() -> Router {
        let store = SqliteGatewayStore::in_memory().await.unwrap();
        store
            .create_gateway(
                &NewGateway {
                    mac: "0102030405060708".parse().unwrap(),
                    model: "MX1903".to_string(),
                    serial_number: "M2XABCDEFGH".to_string(),
                    config: CONFIG.to_string(),
                    auto_update_firmware: false,
                },
                &["MX19".to_string()],
            )
            .await
            .unwrap();
        let engine = HeartbeatEngine::new(
            Arc::new(store),
            Arc::new(NullAuthority),
            EngineSettings {
                offline_limit: 600,
                notify_retry: RetryPolicy {
                    attempts: 1,
                    base_delay: Duration::from_millis(1),
                },
                managed_model_prefixes: vec!["MX19".to_string()],
            },
        );
        build(AppState::new(Arc::new(engine), "current"))
    }

    fn post_heartbeat(body: serde_json::Value) -> Request<Body> {
        Request::post("/api/heartbeat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(res: Response) -> T {
        let bytes = axum::body::to_bytes(res.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_returns_config_on_drift() {
        let res = app()
            .await
            .oneshot(post_heartbeat(serde_json::json!({
                "gatewayMac": "0102030405060708",
                "model": "MX1903",
                "configHash": Md5Sum::of("old").to_string(),
                "osVersion": "5.0.0",
                "statistics": "rx=1"
            })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
        let body: serde_json::Value = read_json(res).await;
        assert_eq!(body, serde_json::json!({ "config": CONFIG }));
    }

    #[tokio::test]
    async fn test_converged_heartbeat_has_empty_body() {
        let res = app()
            .await
            .oneshot(post_heartbeat(serde_json::json!({
                "gatewayMac": "0102030405060708",
                "model": "MX1903",
                "configHash": Md5Sum::of(CONFIG).to_string(),
            })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: HeartbeatResponseDto = read_json(res).await;
        assert!(body.is_converged());
    }

    #[tokio::test]
    async fn test_heartbeat_error_statuses() {
        let cases = [
            ("01020304", "MX1903", StatusCode::BAD_REQUEST, "invalid_identity"),
            ("0102030405060709", "MX1903", StatusCode::NOT_FOUND, "not_found"),
            (
                "0102030405060708",
                "MX1801",
                StatusCode::UNAUTHORIZED,
                "authentication_failure",
            ),
        ];
        for (mac, model, status, code) in cases {
            let res = app()
                .await
                .oneshot(post_heartbeat(serde_json::json!({
                    "gatewayMac": mac,
                    "model": model,
                    "configHash": Md5Sum::of(CONFIG).to_string(),
                })))
                .await
                .unwrap();
            assert_eq!(res.status(), status, "{mac} {model}");
            let body: ErrorBody = read_json(res).await;
            assert_eq!(body.code, code);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_argument() {
        let res = app()
            .await
            .oneshot(post_heartbeat(serde_json::json!({ "gatewayMac": 42 })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read_json(res).await;
        assert_eq!(body.code, "invalid_argument");
    }

    #[tokio::test]
    async fn test_system_routes() {
        let app = app().await;
        let res = app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::get("/api/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            format!("fleetbeat_{}", env!("CARGO_PKG_VERSION"))
        );
    }
}
