//! HTTP client for an OpenAI-compatible chat completion endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CompletionConfig;

#[derive(Debug, Error)]
pub enum CompletionError {
	#[error("no API key configured")]
	MissingApiKey,

	/// The service answered with a non-success status.
	#[error("completion request failed with status {status}: {body}")]
	Request { status: u16, body: String },

	#[error("completion response had no choices")]
	EmptyResponse,

	#[error(transparent)]
	Transport(#[from] reqwest::Error),
}

impl CompletionError {
	fn is_retryable(&self) -> bool {
		match self {
			Self::Request { status, .. } => *status == 429 || *status >= 500,
			Self::Transport(err) => err.is_connect() || err.is_timeout() || err.is_request(),
			Self::MissingApiKey | Self::EmptyResponse => false,
		}
	}
}

#[derive(Serialize)]
struct ChatRequest<'a> {
	model: &'a str,
	messages: [ChatMessage<'a>; 1],
	temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
	role: &'a str,
	content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
	choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
	message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
	content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
	http: reqwest::Client,
	config: CompletionConfig,
	api_key: String,
}

impl CompletionClient {
	pub fn new(config: CompletionConfig, api_key: impl Into<String>) -> Self {
		Self {
			http: reqwest::Client::new(),
			config,
			api_key: api_key.into(),
		}
	}

	/// Sends `prompt` as a single user message and returns the first choice.
	///
	/// Throttling, server errors and connection failures are retried with exponential backoff
	/// up to `max_attempts`; anything else fails immediately.
	pub async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
		if self.api_key.is_empty() {
			return Err(CompletionError::MissingApiKey);
		}

		let attempts = self.config.max_attempts.max(1);
		let mut backoff = Duration::from_millis(self.config.backoff_ms);
		let mut attempt = 1;
		loop {
			match self.request(prompt).await {
				Ok(text) => return Ok(text),
				Err(err) if attempt < attempts && err.is_retryable() => {
					warn!(target = "selcap", attempt, error = %err, "completion attempt failed, retrying");
					tokio::time::sleep(backoff).await;
					backoff *= 2;
					attempt += 1;
				}
				Err(err) => return Err(err),
			}
		}
	}

	async fn request(&self, prompt: &str) -> Result<String, CompletionError> {
		let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
		let body = ChatRequest {
			model: &self.config.model,
			messages: [ChatMessage {
				role: "user",
				content: prompt,
			}],
			temperature: self.config.temperature,
		};

		debug!(target = "selcap", url = %url, model = %self.config.model, "completion request");
		let response = self
			.http
			.post(&url)
			.bearer_auth(&self.api_key)
			.json(&body)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(CompletionError::Request {
				status: status.as_u16(),
				body,
			});
		}

		let parsed: ChatResponse = response.json().await?;
		parsed
			.choices
			.into_iter()
			.next()
			.map(|choice| choice.message.content)
			.ok_or(CompletionError::EmptyResponse)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use axum::Json;
	use axum::Router;
	use axum::extract::State;
	use axum::http::StatusCode;
	use axum::routing::post;
	use serde_json::{Value, json};
	use tokio::net::TcpListener;

	use super::*;

	#[derive(Clone)]
	struct Script {
		calls: Arc<AtomicUsize>,
		failures: usize,
		failure_status: StatusCode,
	}

	async fn chat(State(script): State<Script>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
		let call = script.calls.fetch_add(1, Ordering::SeqCst);
		if call < script.failures {
			return (script.failure_status, Json(json!({"error": "busy"})));
		}
		let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
		(
			StatusCode::OK,
			Json(json!({"choices": [{"message": {"role": "assistant", "content": format!("echo: {prompt}")}}]})),
		)
	}

	async fn serve(script: Script) -> String {
		let app = Router::new()
			.route("/v1/chat/completions", post(chat))
			.with_state(script);
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{addr}/v1")
	}

	fn client(base_url: String) -> CompletionClient {
		let config = CompletionConfig {
			base_url,
			max_attempts: 3,
			backoff_ms: 1,
			..CompletionConfig::default()
		};
		CompletionClient::new(config, "test-key")
	}

	#[tokio::test]
	async fn server_errors_are_retried() {
		let calls = Arc::new(AtomicUsize::new(0));
		let url = serve(Script {
			calls: Arc::clone(&calls),
			failures: 2,
			failure_status: StatusCode::SERVICE_UNAVAILABLE,
		})
		.await;

		let text = client(url).complete("hi").await.unwrap();
		assert_eq!(text, "echo: hi");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn retries_are_bounded() {
		let calls = Arc::new(AtomicUsize::new(0));
		let url = serve(Script {
			calls: Arc::clone(&calls),
			failures: 10,
			failure_status: StatusCode::INTERNAL_SERVER_ERROR,
		})
		.await;

		let err = client(url).complete("hi").await.unwrap_err();
		assert!(matches!(err, CompletionError::Request { status: 500, .. }), "got {err:?}");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn client_errors_surface_immediately() {
		let calls = Arc::new(AtomicUsize::new(0));
		let url = serve(Script {
			calls: Arc::clone(&calls),
			failures: 1,
			failure_status: StatusCode::UNAUTHORIZED,
		})
		.await;

		let err = client(url).complete("hi").await.unwrap_err();
		assert!(matches!(err, CompletionError::Request { status: 401, .. }), "got {err:?}");
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn missing_key_fails_without_request() {
		let client = CompletionClient::new(CompletionConfig::default(), "");
		let err = client.complete("hi").await.unwrap_err();
		assert!(matches!(err, CompletionError::MissingApiKey));
	}
}
