use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_COMPAT_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_API_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
const DEFAULT_MAIL_DISPLAY_NAME: &str = "Simonnop's Mail Bot";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the gateway, loaded once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the hosted LLM provider. Requests fail individually when absent.
    pub dashscope_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoints (chat completions and file store).
    pub dashscope_compat_url: String,
    /// Base URL of the native endpoints (multimodal generation).
    pub dashscope_api_url: String,
    /// Model used by `/llm/ask` when the request does not name one.
    pub default_model: String,
    /// Long-context model used when files are uploaded to the provider store.
    pub long_context_model: String,
    /// Vision-capable model used for rasterized PDF pages.
    pub vision_model: String,
    /// Sender mailbox used as the From address and SMTP login.
    pub mail_sender: Option<String>,
    /// App-specific SMTP password for the sender mailbox.
    pub mail_password: Option<String>,
    /// Display name paired with the sender address.
    pub mail_display_name: String,
    /// SMTP relay host.
    pub smtp_host: String,
    /// SMTP relay port (STARTTLS).
    pub smtp_port: u16,
    /// Port the HTTP server listens on.
    pub server_port: u16,
    /// Upper bound on request handling and provider calls.
    pub request_timeout: Duration,
    /// Maximum accepted request body size in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            dashscope_api_key: load_env_optional("DASHSCOPE_API_KEY"),
            dashscope_compat_url: load_env_url("DASHSCOPE_COMPAT_URL", DEFAULT_COMPAT_URL)?,
            dashscope_api_url: load_env_url("DASHSCOPE_API_URL", DEFAULT_API_URL)?,
            default_model: load_env_or("LLM_DEFAULT_MODEL", "qwen-plus"),
            long_context_model: load_env_or("LLM_LONG_MODEL", "qwen-long"),
            vision_model: load_env_or("LLM_VISION_MODEL", "qwen-vl-max-latest"),
            mail_sender: load_env_optional("QQ_EMAIL"),
            mail_password: load_env_optional("QQ_PASSWORD"),
            mail_display_name: load_env_or("MAIL_DISPLAY_NAME", DEFAULT_MAIL_DISPLAY_NAME),
            smtp_host: load_env_or("SMTP_HOST", "smtp.qq.com"),
            smtp_port: parse_env("SMTP_PORT")?.unwrap_or(587),
            server_port: parse_env("SERVER_PORT")?.unwrap_or(10101),
            request_timeout: Duration::from_secs(
                parse_env("REQUEST_TIMEOUT_SECS")?.unwrap_or(600),
            ),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES")?.unwrap_or(100 * 1024 * 1024),
        })
    }

    /// Configuration with every optional credential unset, pointing at the public endpoints.
    pub fn with_defaults() -> Self {
        Self {
            dashscope_api_key: None,
            dashscope_compat_url: DEFAULT_COMPAT_URL.into(),
            dashscope_api_url: DEFAULT_API_URL.into(),
            default_model: "qwen-plus".into(),
            long_context_model: "qwen-long".into(),
            vision_model: "qwen-vl-max-latest".into(),
            mail_sender: None,
            mail_password: None,
            mail_display_name: DEFAULT_MAIL_DISPLAY_NAME.into(),
            smtp_host: "smtp.qq.com".into(),
            smtp_port: 587,
            server_port: 10101,
            request_timeout: Duration::from_secs(600),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_url(key: &str, default: &str) -> Result<String, ConfigError> {
    validate_url(key, load_env_or(key, default))
}

/// Accept only absolute http(s) URLs.
fn validate_url(key: &str, value: String) -> Result<String, ConfigError> {
    match reqwest::Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!("{key}={value}"))),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        compat_url = %config.dashscope_compat_url,
        api_url = %config.dashscope_api_url,
        has_api_key = config.dashscope_api_key.is_some(),
        has_mail_credentials = config.mail_sender.is_some() && config.mail_password.is_some(),
        server_port = config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_public_endpoints() {
        let config = Config::with_defaults();
        assert_eq!(config.default_model, "qwen-plus");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.server_port, 10101);
        assert!(config.dashscope_api_key.is_none());
        assert!(config.dashscope_compat_url.ends_with("/compatible-mode/v1"));
    }

    #[test]
    fn unset_numeric_variable_is_none() {
        let value: Option<u16> =
            parse_env("PXTOOLS_TEST_UNSET_NUMERIC").expect("unset variable is not an error");
        assert!(value.is_none());
    }

    #[test]
    fn provider_urls_must_be_absolute_http() {
        let url = validate_url("DASHSCOPE_API_URL", "http://127.0.0.1:8080/api/v1/".into())
            .expect("valid url");
        assert_eq!(url, "http://127.0.0.1:8080/api/v1/");

        for bad in ["dashscope.aliyuncs.com/api/v1", "ftp://host/api", "not a url"] {
            let error = validate_url("DASHSCOPE_API_URL", bad.into()).expect_err("rejected");
            assert!(matches!(
                error,
                ConfigError::InvalidValue(ref detail) if detail.starts_with("DASHSCOPE_API_URL=")
            ));
        }
    }
}
