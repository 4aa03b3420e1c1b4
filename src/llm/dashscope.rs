//! HTTP adapter for the DashScope chat, file-store, and multimodal endpoints.

use crate::config::Config;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Client, Method,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{
    ChatMessage, ChatOptions, ChatProvider, ContentItem, FileStore, LlmError, ProviderFileHandle,
    UploadedFile, VisionProvider,
};

/// Frame rate attached to the page sequence. The provider requires one for video inputs.
const VIDEO_FPS: f32 = 2.0;

/// Purpose under which uploaded files are registered for long-context extraction.
const FILE_PURPOSE: &str = "file-extract";

/// Lightweight HTTP client for the DashScope provider.
///
/// Idle connections are never pooled, so each call opens its own connection.
pub struct DashScopeClient {
    pub(crate) http: Client,
    pub(crate) compat_url: String,
    pub(crate) api_url: String,
    pub(crate) api_key: Option<String>,
}

impl DashScopeClient {
    /// Construct a client from the loaded configuration.
    pub fn new(config: &Config) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("pxtools/0.1")
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        let compat_url = normalize_base_url(&config.dashscope_compat_url);
        let api_url = normalize_base_url(&config.dashscope_api_url);
        tracing::debug!(
            compat_url = %compat_url,
            api_url = %api_url,
            has_api_key = config.dashscope_api_key.is_some(),
            "Initialized DashScope HTTP client"
        );

        Ok(Self {
            http,
            compat_url,
            api_url,
            api_key: config.dashscope_api_key.clone(),
        })
    }

    fn request(&self, method: Method, url: String) -> Result<reqwest::RequestBuilder, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(LlmError::MissingApiKey)?;
        Ok(self.http.request(method, url).bearer_auth(api_key))
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, LlmError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = LlmError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "DashScope request failed");
        Err(error)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_search: Option<bool>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Deserialize)]
struct MultimodalResponse {
    #[serde(default)]
    output: Option<MultimodalOutput>,
}

#[derive(Deserialize)]
struct MultimodalOutput {
    #[serde(default)]
    choices: Vec<MultimodalChoice>,
}

#[derive(Deserialize)]
struct MultimodalChoice {
    message: MultimodalMessage,
}

#[derive(Deserialize)]
struct MultimodalMessage {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[async_trait]
impl ChatProvider for DashScopeClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &options.model,
            messages: &messages,
            enable_search: options.enable_search,
        };

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            enable_search = ?options.enable_search,
            "DashScope chat request"
        );
        let response = self
            .request(
                Method::POST,
                format_endpoint(&self.compat_url, "chat/completions"),
            )?
            .json(&body)
            .send()
            .await?;
        let response = self.ensure_success(response).await?;

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("completion carried no message content".into()))
    }
}

#[async_trait]
impl FileStore for DashScopeClient {
    async fn upload_file(&self, file: &UploadedFile) -> Result<ProviderFileHandle, LlmError> {
        let part = Part::bytes(file.content.to_vec()).file_name(file.filename.clone());
        let form = Form::new().text("purpose", FILE_PURPOSE).part("file", part);

        let response = self
            .request(Method::POST, format_endpoint(&self.compat_url, "files"))?
            .multipart(form)
            .send()
            .await?;
        let response = self.ensure_success(response).await?;

        let FileObject { id } = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        tracing::debug!(filename = %file.filename, file_id = %id, "File registered with provider");
        Ok(ProviderFileHandle(id))
    }

    async fn delete_file(&self, handle: &ProviderFileHandle) -> Result<(), LlmError> {
        let response = self
            .request(
                Method::DELETE,
                format_endpoint(&self.compat_url, &format!("files/{}", handle.0)),
            )?
            .send()
            .await?;
        self.ensure_success(response).await?;
        tracing::debug!(file_id = %handle.0, "Provider file deleted");
        Ok(())
    }
}

#[async_trait]
impl VisionProvider for DashScopeClient {
    async fn vision_complete(
        &self,
        model: &str,
        frames: &[PathBuf],
        question: &str,
    ) -> Result<String, LlmError> {
        let mut video = Vec::with_capacity(frames.len());
        for frame in frames {
            video.push(image_data_url(frame).await?);
        }

        let body = json!({
            "model": model,
            "input": {
                "messages": [
                    {
                        "role": "user",
                        "content": [
                            { "video": video, "fps": VIDEO_FPS },
                            { "text": question },
                        ]
                    }
                ]
            }
        });

        tracing::debug!(model, frames = frames.len(), "DashScope multimodal request");
        let response = self
            .request(
                Method::POST,
                format_endpoint(
                    &self.api_url,
                    "services/aigc/multimodal-generation/generation",
                ),
            )?
            .json(&body)
            .send()
            .await?;
        let response = self.ensure_success(response).await?;

        let payload: MultimodalResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        payload
            .output
            .and_then(|output| output.choices.into_iter().next())
            .and_then(|choice| choice.message.content.into_iter().next())
            .and_then(ContentItem::into_text)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Read a local page image and inline it as a base64 data URL.
async fn image_data_url(path: &Path) -> Result<String, LlmError> {
    let bytes = tokio::fs::read(path).await?;
    let mime = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// Base URLs are validated when configuration loads; only the trailing slash is dropped here.
fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
