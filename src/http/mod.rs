//! HTTP 接口（axum）
//!
//! - `POST /api/agent/run`：启动实例，202 返回实例 ID 与状态查询地址；输入不合法返回 400
//! - `GET /api/agent/status/:id`：查询状态，未知实例 404
//! - `POST /api/agent/event/:id/:name`：向实例发送外部事件（如审批），请求体为 JSON 或纯文本
//! - `POST /api/agent/terminate/:id`：终止实例
//! - `GET /api/health`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::{DurableClient, HostError, StartRequest};

pub struct HttpState {
    pub client: DurableClient,
    /// 状态查询地址前缀；未设置时由请求的 Host 头推出
    pub public_base_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    message: &'static str,
    instance_id: String,
    status_query_get_uri: String,
}

#[derive(Debug, Default, Deserialize)]
struct TerminateRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: error.into() })).into_response()
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        match self {
            HostError::Validation(message) => error_response(StatusCode::BAD_REQUEST, message),
            HostError::InstanceNotFound(_) => {
                error_response(StatusCode::NOT_FOUND, "Instance not found.")
            }
            HostError::InstanceNotRunning(_) => {
                error_response(StatusCode::CONFLICT, "Instance is not running.")
            }
        }
    }
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/api/agent/run", post(api_run))
        .route("/api/agent/status/:id", get(api_status))
        .route("/api/agent/event/:id/:name", post(api_raise_event))
        .route("/api/agent/terminate/:id", post(api_terminate))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

fn base_url(state: &HttpState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_base_url {
        return url.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// 请求体：JSON `{"prompt": .., "metadata": ..}`，或纯文本作为 prompt
fn parse_start_request(headers: &HeaderMap, body: &str) -> Result<StartRequest, HostError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
        || body.trim_start().starts_with('{');
    if is_json {
        serde_json::from_str(body)
            .map_err(|e| HostError::Validation(format!("Invalid request body: {e}")))
    } else {
        Ok(StartRequest::new(body))
    }
}

async fn api_run(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<RunResponse>), HostError> {
    let request = parse_start_request(&headers, &body)?;
    let started = state
        .client
        .start_new(request, &base_url(&state, &headers))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunResponse {
            message: "Agent orchestration started.",
            instance_id: started.instance_id,
            status_query_get_uri: started.status_query_uri,
        }),
    ))
}

async fn api_status(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> Result<Response, HostError> {
    let status = state.client.get_status(&id).await?;
    Ok(Json(status).into_response())
}

/// 请求体能解析为 JSON 时按 JSON 传递，否则作为字符串
async fn api_raise_event(
    State(state): State<Arc<HttpState>>,
    Path((id, name)): Path<(String, String)>,
    body: String,
) -> Result<StatusCode, HostError> {
    let payload = serde_json::from_str(&body)
        .unwrap_or_else(|_| serde_json::Value::String(body.trim().to_string()));
    state.client.raise_event(&id, &name, payload).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn api_terminate(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<Response, HostError> {
    let request: TerminateRequest = serde_json::from_str(&body).unwrap_or_default();
    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Terminated by user.".to_string());
    let status = state.client.terminate(&id, &reason).await?;
    Ok((StatusCode::ACCEPTED, Json(status)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::core::RuntimeBuilder;
    use crate::llm::ScriptedLlmClient;

    fn app(replies: Vec<&'static str>) -> Router {
        let client = RuntimeBuilder::new(AppConfig::default())
            .with_llm(Arc::new(ScriptedLlmClient::replying(replies)))
            .build_client();
        router(Arc::new(HttpState {
            client,
            public_base_url: None,
        }))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_run_returns_accepted_with_status_uri() {
        let response = app(vec!["4"])
            .oneshot(
                Request::post("/api/agent/run")
                    .header(header::HOST, "localhost:7071")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"prompt": "2+2?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let id = body["instanceId"].as_str().unwrap();
        assert_eq!(
            body["statusQueryGetUri"],
            format!("http://localhost:7071/api/agent/status/{id}")
        );
    }

    #[tokio::test]
    async fn test_plain_text_prompt_is_accepted() {
        let response = app(vec!["hi"])
            .oneshot(
                Request::post("/api/agent/run")
                    .body(Body::from("say hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_bad_request() {
        let response = app(vec![])
            .oneshot(
                Request::post("/api/agent/run")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"prompt": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let router = app(vec![]);
        let response = router
            .clone()
            .oneshot(
                Request::get("/api/agent/status/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Instance not found."})
        );

        let response = router
            .oneshot(
                Request::post("/api/agent/terminate/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_approval_event_completes_instance() {
        let mut config = AppConfig::default();
        config.orchestration.approval.enabled = true;
        let client = RuntimeBuilder::new(config)
            .with_llm(Arc::new(ScriptedLlmClient::replying(["draft"])))
            .build_client();
        let router = router(Arc::new(HttpState {
            client: client.clone(),
            public_base_url: None,
        }));

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/agent/event/does-not-exist/approval")
                    .body(Body::from("approve"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/agent/run")
                    .body(Body::from("plan a trip"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = json_body(response).await["instanceId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router
            .clone()
            .oneshot(
                Request::post(format!("/api/agent/event/{id}/approval"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"approved": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let status = client
            .wait_for_completion(&id, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status.runtime_status, crate::core::RuntimeStatus::Completed);
        assert_eq!(status.output.as_deref(), Some("draft"));

        let response = router
            .oneshot(
                Request::post(format!("/api/agent/event/{id}/approval"))
                    .body(Body::from("approve"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(vec![])
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
