use crate::config::Config;
use crate::stream::SessionError;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1/";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Chat Completions endpoint plus the request parameters that stay fixed
/// for every turn.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, api_base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint_url(api_base)?,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    pub fn from_config(http: reqwest::Client, cfg: &Config) -> anyhow::Result<Self> {
        let mut client = Self::new(http, cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))?;
        if let Some(model) = &cfg.model {
            client.model = model.clone();
        }
        if let Some(t) = cfg.temperature {
            client.temperature = t;
        }
        if let Some(p) = &cfg.system_prompt {
            client.system_prompt = p.clone();
        }
        Ok(client)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Only the system prompt and the newest user turn are sent; earlier
    /// transcript turns are not replayed.
    pub fn request_body<'a>(&'a self, user_text: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            stream: true,
            messages: vec![
                Message {
                    role: "system",
                    content: &self.system_prompt,
                },
                Message {
                    role: "user",
                    content: user_text,
                },
            ],
        }
    }

    fn headers(&self, credential: &str) -> Result<HeaderMap, SessionError> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|_| SessionError::Request("credential is not a valid header value".into()))?;
        auth.set_sensitive(true);
        h.insert(AUTHORIZATION, auth);
        Ok(h)
    }

    /// Send the request and wait for response headers.
    ///
    /// Any non-2xx status is turned into [`SessionError::Http`] carrying the
    /// response body text, so the caller never sees a body to stream from a
    /// failed call.
    pub async fn open(&self, credential: &str, user_text: &str) -> Result<reqwest::Response, SessionError> {
        let headers = self.headers(credential)?;
        let body = self.request_body(user_text);

        tracing::debug!(url = %self.endpoint, model = %self.model, messages = body.messages.len(), "sending chat request");

        let resp = self
            .http
            .post(self.endpoint.clone())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text
            };
            return Err(SessionError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(resp)
    }
}

fn endpoint_url(api_base: &str) -> anyhow::Result<Url> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let base = if api_base.ends_with('/') {
        api_base.to_string()
    } else {
        format!("{api_base}/")
    };
    let base = Url::parse(&base).with_context(|| format!("invalid api_base: {api_base}"))?;
    base.join("chat/completions")
        .context("failed to build chat completions URL")
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub temperature: f32,
    pub stream: bool,
    pub messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Message<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let c = ChatClient::new(reqwest::Client::new(), "http://localhost:1234/v1").unwrap();
        assert_eq!(c.endpoint().as_str(), "http://localhost:1234/v1/chat/completions");

        let c = ChatClient::new(reqwest::Client::new(), DEFAULT_API_BASE).unwrap();
        assert_eq!(c.endpoint().as_str(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn body_has_system_and_latest_user_turn_only() {
        let c = ChatClient::new(reqwest::Client::new(), DEFAULT_API_BASE).unwrap();
        let v = serde_json::to_value(c.request_body("Hello")).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "model": "gpt-4.1",
                "temperature": 0.7f32,
                "stream": true,
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": "Hello"}
                ]
            })
        );
    }

    #[test]
    fn config_overrides_defaults() {
        let cfg = Config {
            model: Some("gpt-4o-mini".into()),
            temperature: Some(0.2),
            api_base: Some("http://127.0.0.1:9/api/".into()),
            system_prompt: Some("Be brief.".into()),
        };
        let c = ChatClient::from_config(reqwest::Client::new(), &cfg).unwrap();
        assert_eq!(c.model(), "gpt-4o-mini");
        assert_eq!(c.endpoint().as_str(), "http://127.0.0.1:9/api/chat/completions");
        let v = serde_json::to_value(c.request_body("x")).unwrap();
        assert_eq!(v["messages"][0]["content"], "Be brief.");
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let c = ChatClient::new(reqwest::Client::new(), DEFAULT_API_BASE).unwrap();
        let h = c.headers("sk-test").unwrap();
        let auth = h.get(AUTHORIZATION).unwrap();
        assert!(auth.is_sensitive());
        assert_eq!(auth.to_str().unwrap(), "Bearer sk-test");
        assert_eq!(h.get(CONTENT_TYPE).unwrap().to_str().unwrap(), "application/json");
    }
}
