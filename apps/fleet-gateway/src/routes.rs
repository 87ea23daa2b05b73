//! 路由定义
//!
//! - 健康检查：/health
//! - OsmAnd 推送：/ 与 /osmand（GET 查询串、POST 表单）
//! - 运维查询：/metrics、/sessions

use super::AppState;
use super::handlers::*;
use axum::{Router, routing::get};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(osmand_push_query).post(osmand_push_body))
        .route("/osmand", get(osmand_push_query).post(osmand_push_body))
        .route("/metrics", get(get_metrics))
        .route("/sessions", get(list_sessions))
}
