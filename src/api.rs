//! HTTP surface for the gateway.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `GET /health_check` – Liveness probe.
//! - `POST /llm/ask` – Forward a question (`question`, optional `model` and `enable_search`)
//!   to the chat model.
//! - `POST /llm/ask_with_files` – Multipart form with a `question` field and one or more
//!   `files` parts; a lone PDF is read by the vision model, anything else is uploaded to the
//!   provider's file store.
//! - `POST /send_email` – Relay a message (`to_email`, `content`, optional `subject` and
//!   `content_type`) over SMTP.
//!
//! Every endpoint except the health check answers with the same envelope:
//! `{"success": bool, "message": string, "data"?: object, "error"?: string}`. Validation
//! failures map to `400`, everything else to `500`.

use crate::config::Config;
use crate::llm::UploadedFile;
use crate::mail::ContentKind;
use crate::service::GatewayApi;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

const DEFAULT_SUBJECT: &str = "无主题";

/// Build the HTTP router exposing the gateway surface.
pub fn create_router<S>(service: Arc<S>, config: &Config) -> Router
where
    S: GatewayApi + 'static,
{
    Router::new()
        .route("/health_check", get(health_check))
        .route("/llm/ask", post(llm_ask::<S>))
        .route("/llm/ask_with_files", post(llm_ask_with_files::<S>))
        .route("/send_email", post(send_email::<S>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Uniform response body shared by every gateway endpoint.
#[derive(Serialize)]
struct Envelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn succeed(message: impl Into<String>, data: Value) -> Response {
    let body = Envelope {
        success: true,
        message: message.into(),
        data: Some(data),
        error: None,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn fail(status: StatusCode, message: impl Into<String>, error: Option<String>) -> Response {
    let body = Envelope {
        success: false,
        message: message.into(),
        data: None,
        error,
    };
    (status, Json(body)).into_response()
}

/// Liveness probe.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "服务运行正常"
    }))
}

/// Forward a single question to the chat model.
///
/// Bodies that are not JSON objects are treated as empty, so they fail the `question` check.
async fn llm_ask<S>(State(service): State<Arc<S>>, body: Bytes) -> Response
where
    S: GatewayApi,
{
    let payload = parse_object(&body).unwrap_or_default();
    let question = field_text(&payload, "question");
    if question.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "question 不能为空", None);
    }
    let model = Some(field_text(&payload, "model"))
        .filter(|model| !model.is_empty())
        .unwrap_or_else(|| service.default_model().to_string());
    let enable_search = payload.get("enable_search").is_some_and(truthy);

    match service.ask(&question, &model, enable_search).await {
        Ok(answer) => {
            tracing::info!(model = %model, enable_search, "Ask request completed");
            succeed(
                "调用成功",
                json!({
                    "answer": answer,
                    "model": model,
                    "enable_search": enable_search,
                }),
            )
        }
        Err(error) if error.is_validation() => {
            fail(StatusCode::BAD_REQUEST, error.to_string(), None)
        }
        Err(error) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "LLM 调用失败",
            Some(error.to_string()),
        ),
    }
}

/// Answer a question using the files attached to a multipart form.
async fn llm_ask_with_files<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response
where
    S: GatewayApi,
{
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return fail(
                StatusCode::BAD_REQUEST,
                format!("处理请求时发生错误: {}", rejection.body_text()),
                None,
            );
        }
    };

    let mut question = String::new();
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                return fail(
                    error.status(),
                    format!("处理请求时发生错误: {}", error.body_text()),
                    None,
                );
            }
        };
        let name = field.name().map(str::to_string);
        let filename = field.file_name().map(str::to_string);
        let read = match (name.as_deref(), filename) {
            (Some("question"), _) => field.text().await.map(|text| question = text),
            (Some("files"), Some(filename)) if !filename.is_empty() => field
                .bytes()
                .await
                .map(|content| files.push(UploadedFile::new(filename, content))),
            _ => Ok(()),
        };
        if let Err(error) = read {
            return fail(
                error.status(),
                format!("处理请求时发生错误: {}", error.body_text()),
                None,
            );
        }
    }

    if question.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "question 不能为空", None);
    }
    if files.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "files 不能为空", None);
    }

    let names: Vec<String> = files.iter().map(|file| file.filename.clone()).collect();
    match service.ask_with_files(&question, &files).await {
        Ok(outcome) => {
            tracing::info!(
                files = names.len(),
                model = %outcome.model,
                route = ?outcome.route,
                "Ask-with-files request completed"
            );
            succeed(
                "调用成功",
                json!({
                    "answer": outcome.answer,
                    "model": outcome.model,
                    "enable_search": false,
                    "files": names,
                }),
            )
        }
        Err(error) if error.is_validation() => {
            fail(StatusCode::BAD_REQUEST, error.to_string(), None)
        }
        Err(error) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "LLM 调用失败",
            Some(error.to_string()),
        ),
    }
}

/// Relay an email through the configured SMTP server.
async fn send_email<S>(State(service): State<Arc<S>>, body: Bytes) -> Response
where
    S: GatewayApi,
{
    let Some(payload) = parse_object(&body).filter(|payload| !payload.is_empty()) else {
        return fail(
            StatusCode::BAD_REQUEST,
            "请求体不能为空，请提供JSON数据",
            None,
        );
    };

    let to_email = field_text(&payload, "to_email");
    let subject = match payload.get("subject") {
        None | Some(Value::Null) => DEFAULT_SUBJECT.to_string(),
        Some(_) => field_text(&payload, "subject"),
    };
    let content = field_text(&payload, "content");
    let content_type = Some(field_text(&payload, "content_type"))
        .filter(|kind| !kind.is_empty())
        .unwrap_or_else(|| "text".to_string());

    if to_email.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "参数错误：to_email 不能为空", None);
    }
    if content.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "参数错误：content 不能为空", None);
    }

    let kind = ContentKind::from_request(&content_type);
    match service.send_email(&to_email, &subject, &content, kind).await {
        Ok(message) => succeed(
            message,
            json!({
                "to_email": to_email,
                "subject": subject,
            }),
        ),
        Err(error) if error.is_validation() => {
            fail(StatusCode::BAD_REQUEST, error.to_string(), None)
        }
        Err(error) => fail(StatusCode::INTERNAL_SERVER_ERROR, error.to_string(), None),
    }
}

/// Parse a JSON object body, returning `None` for anything else.
fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Render a field as text: strings verbatim, `null`/missing as empty, other values as JSON.
fn field_text(payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// JSON truthiness: `false`, `null`, `0`, empty strings and empty containers are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
