//! Blocking Ollama HTTP client shared by the OCR engine and vision analyzer.
//!
//! Both capabilities talk to `/api/chat` with base64 images attached; only
//! the model and prompt differ. Transport and status failures are mapped
//! onto `VisionError` so the retry policy can tell transient from fatal.

use serde::{Deserialize, Serialize};

use super::vision::VisionError;

/// Ollama HTTP client for local vision inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a new client pointing at an Ollama instance.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, VisionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| VisionError::HttpClient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    /// Default Ollama instance at localhost:11434 with 5-minute timeout.
    pub fn default_local() -> Result<Self, VisionError> {
        Self::new("http://localhost:11434", 300)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one user turn with images and return the assistant's content.
    ///
    /// `images` are base64-encoded. `json_format` asks Ollama to constrain
    /// the output to JSON.
    pub fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
        json_format: bool,
    ) -> Result<String, VisionError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
                images: None,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
            images: Some(images),
        });

        let body = ChatRequest {
            model,
            messages,
            stream: false,
            format: json_format.then_some("json"),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    VisionError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    VisionError::Timeout(self.timeout_secs)
                } else {
                    VisionError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;

        Ok(parsed.message.content)
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

/// Response body from Ollama /api/chat (non-streaming)
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}
