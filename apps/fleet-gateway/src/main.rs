//! 车载终端接入网关：原始 TCP 接入 + OsmAnd HTTP 推送 + 运维查询。

mod handlers;
mod ingest;
mod routes;
mod utils;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use fleet_config::AppConfig;
use fleet_ingest::{FixHandler, TcpListenerConfig, TcpListenerSource};
use fleet_pipeline::IngestionPipeline;
use fleet_session::{IdlePolicy, SessionRegistry, spawn_sweeper};
use fleet_telemetry::{init_tracing, new_request_ids};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub handler: Arc<dyn FixHandler>,
    pub pipeline: IngestionPipeline,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let shutdown = CancellationToken::new();
    let stack = ingest::build_ingest(&config)?;
    let handler: Arc<dyn FixHandler> = stack.handler.clone();

    let registry = Arc::new(SessionRegistry::new(IdlePolicy {
        detect_timeout: config.detect_timeout(),
        heartbeat_idle: config.heartbeat_idle(),
        silent_idle: config.silent_idle(),
    }));
    let sweeper = spawn_sweeper(registry.clone(), config.sweep_interval(), shutdown.clone());

    let tcp = TcpListenerSource::bind(
        TcpListenerConfig {
            addr: config.tcp_addr.clone(),
            max_connections: config.max_connections,
            max_frame_buffer_bytes: config.max_frame_buffer_bytes,
            detect_timeout: config.detect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            ..TcpListenerConfig::default()
        },
        registry.clone(),
    )
    .await?;
    let tcp_task = tokio::spawn(tcp.run(handler.clone(), shutdown.clone()));

    let app = build_app(AppState {
        registry,
        handler,
        pipeline: stack.pipeline.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "fleet.http", addr = %config.http_addr, "http_listener_started");

    tokio::spawn(wait_for_signal(shutdown.clone()));
    let http_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await?;

    // 停止顺序：接入 → 流水线排空 → 回收任务
    shutdown.cancel();
    match tcp_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(target: "fleet.ingest", error = %err, "tcp_listener_failed"),
        Err(err) => warn!(target: "fleet.ingest", error = %err, "tcp_listener_join_failed"),
    }
    stack.pipeline.shutdown().await;
    if let Err(err) = sweeper.await {
        warn!(target: "fleet.session", error = %err, "sweeper_join_failed");
    }
    if let Some(eventloop) = stack.mqtt_eventloop {
        eventloop.abort();
    }
    info!("fleet gateway stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "signal_listener_failed");
    }
    info!("shutdown signal received");
    shutdown.cancel();
}

fn build_app(state: AppState) -> Router {
    routes::create_router()
        .with_state(state)
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        target: "fleet.http",
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode, header};
    use domain::{DecodedFix, ProtocolTag, now_epoch_ms};
    use fleet_ingest::IngestError;
    use fleet_pipeline::{NoopSink, PipelineConfig};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Collect(Mutex<Vec<DecodedFix>>);

    #[async_trait]
    impl FixHandler for Collect {
        async fn handle(&self, fix: DecodedFix, _received_at_ms: i64) -> Result<(), IngestError> {
            self.0.lock().unwrap().push(fix);
            Ok(())
        }
    }

    fn app() -> (Router, Arc<Collect>, Arc<SessionRegistry>) {
        let collect = Arc::new(Collect::default());
        let registry = Arc::new(SessionRegistry::default());
        let state = AppState {
            registry: registry.clone(),
            handler: collect.clone(),
            pipeline: IngestionPipeline::start(Arc::new(NoopSink), PipelineConfig::default()),
        };
        (build_app(state), collect, registry)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        assert!(response.headers().contains_key("x-request-id"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _, _) = app();
        let (status, body) = send(
            app,
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn osmand_query_push_is_accepted() {
        let (app, collect, _) = app();
        let (status, body) = send(
            app,
            Request::get("/?id=123456&lat=52.52&lon=13.405&timestamp=1710498030")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["accepted"], 1);
        let fixes = collect.0.lock().unwrap();
        assert_eq!(fixes[0].device_id, "123456");
        assert_eq!(fixes[0].protocol, ProtocolTag::Osmand);
    }

    #[tokio::test]
    async fn osmand_form_post_is_accepted() {
        let (app, collect, _) = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/osmand")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("id=777&lat=22.5&lon=114.05&speed=10"))
            .unwrap();
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(collect.0.lock().unwrap()[0].device_id, "777");
    }

    #[tokio::test]
    async fn osmand_push_without_id_is_bad_request() {
        let (app, collect, _) = app();
        let (status, body) = send(
            app,
            Request::get("/?lat=52.52&lon=13.405").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID.REQUEST");
        assert!(collect.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_can_be_filtered_by_device() {
        let (app, _, registry) = app();
        let bound = registry.register(
            "10.0.0.1:4000".parse().unwrap(),
            CancellationToken::new(),
            now_epoch_ms(),
        );
        registry.set_protocol(bound, ProtocolTag::Gt06);
        registry.bind(bound, "864180030000001").unwrap();
        registry.register(
            "10.0.0.2:4000".parse().unwrap(),
            CancellationToken::new(),
            now_epoch_ms(),
        );

        let (status, body) = send(
            app.clone(),
            Request::get("/sessions").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = send(
            app,
            Request::get("/sessions?deviceId=864180030000001")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let sessions = body["data"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["protocol"], "gt06");
    }

    #[tokio::test]
    async fn metrics_snapshot_lists_every_protocol() {
        let (app, _, _) = app();
        let (status, body) = send(
            app,
            Request::get("/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["protocols"].as_array().unwrap().len(),
            ProtocolTag::ALL.len()
        );
    }
}
