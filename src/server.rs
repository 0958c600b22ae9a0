//! HTTP 接口
//!
//! 只是 `PublishService` 的一层薄封装：
//!
//! | 方法 | 路径 | 说明 |
//! |------|------|------|
//! | POST | `/tasks` | 提交文章，返回 202 + task_id |
//! | GET | `/tasks/{id}` | 任务状态与进度 |
//! | GET | `/tasks/{id}/logs` | 执行事件 |
//! | POST | `/tasks/{id}/cancel` | 取消任务，终态返回 409 |
//! | GET | `/metrics` | Prometheus 文本 |
//! | GET | `/metrics/json` | 指标快照 |

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{AppError, PublishError};
use crate::models::{ArticleSubmission, EventSummary, ExecutionEvent, PublishIntent, TaskId};
use crate::orchestrator::{PublishService, TaskStatusView};

/// 接口错误
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::App(err) = self;
        let (status, kind) = match &err {
            AppError::Publish(e @ PublishError::Validation(_)) => (StatusCode::BAD_REQUEST, e.kind()),
            AppError::Publish(e @ PublishError::CannotCancelTask { .. }) => {
                (StatusCode::CONFLICT, e.kind())
            }
            e if e.is_not_found() => (StatusCode::NOT_FOUND, "TaskNotFound"),
            _ => {
                error!("❌ 接口内部错误: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };
        let body = Json(json!({
            "success": false,
            "error_type": kind,
            "message": err.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: TaskId,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    task_id: TaskId,
    summary: EventSummary,
    events: Vec<ExecutionEvent>,
}

/// 构建路由
pub fn router(service: Arc<PublishService>) -> Router {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/{id}", get(task_status))
        .route("/tasks/{id}/logs", get(task_logs))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
        .with_state(service)
}

/// 监听并服务，直到 `shutdown` 被触发
pub async fn serve(
    bind: &str,
    service: Arc<PublishService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("🌐 HTTP 接口已启动: http://{}", listener.local_addr()?);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP 接口已停止");
    Ok(())
}

async fn submit_task(
    State(service): State<Arc<PublishService>>,
    Json(submission): Json<ArticleSubmission>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let task_id = service
        .submit(
            submission.article,
            submission.metadata,
            submission.provider,
            submission.intent.unwrap_or(PublishIntent::PublishNow),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

async fn task_status(
    State(service): State<Arc<PublishService>>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<TaskStatusView>> {
    Ok(Json(service.get_status(&id).await?))
}

async fn task_logs(
    State(service): State<Arc<PublishService>>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<LogsResponse>> {
    let events = service.get_logs(&id).await?;
    Ok(Json(LogsResponse {
        task_id: id,
        summary: EventSummary::from_events(&events),
        events,
    }))
}

async fn cancel_task(
    State(service): State<Arc<PublishService>>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<serde_json::Value>> {
    service.cancel(&id).await?;
    Ok(Json(json!({ "success": true, "task_id": id })))
}

async fn metrics_text(State(service): State<Arc<PublishService>>) -> ApiResult<Response> {
    let text = service.metrics_text()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

async fn metrics_json(
    State(service): State<Arc<PublishService>>,
) -> Json<crate::instrumentation::MetricsSnapshot> {
    Json(service.metrics_snapshot())
}
