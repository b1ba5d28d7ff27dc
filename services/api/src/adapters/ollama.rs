//! services/api/src/adapters/ollama.rs
//!
//! This module contains the adapter for a local Ollama server, the concrete
//! implementation of the `LanguageModel` port. Completions go through
//! `/api/generate`; streamed completions arrive as newline-delimited JSON.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tutor_core::ports::{
    CompletionRequest, LanguageModel, PortError, PortResult, SamplingOptions, TokenStream,
};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a transport failure to the port error kinds callers degrade on.
pub(crate) fn transport_error(e: reqwest::Error, service: &str) -> PortError {
    if e.is_connect() {
        if e.is_timeout() {
            PortError::ConnectTimeout(service.to_string())
        } else {
            PortError::Unavailable(format!("{}: {}", service, e))
        }
    } else if e.is_timeout() {
        PortError::ReadTimeout(service.to_string())
    } else {
        PortError::Unexpected(format!("{}: {}", service, e))
    }
}

/// Turns a non-success response into a port error, keeping the body as message.
pub(crate) async fn check_status(response: Response, what: &str) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    error!("{} returned {}: {}", what, status, message);
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PortError::NotFound(format!("{}: {}", what, message)));
    }
    Err(PortError::Backend {
        status: status.as_u16(),
        message,
    })
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Serialize, PartialEq)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

//=========================================================================================
// The Adapter
//=========================================================================================

#[derive(Clone)]
pub struct OllamaAdapter {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaAdapter {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            max_tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sampling options left unset fall back to the adapter's configuration.
    fn options(&self, options: &SamplingOptions) -> GenerateOptions {
        GenerateOptions {
            temperature: options.temperature.unwrap_or(self.temperature),
            num_predict: options.num_predict.unwrap_or(self.max_tokens),
            top_p: options.top_p,
            top_k: options.top_k,
        }
    }

    async fn post_generate(&self, request: &CompletionRequest, stream: bool) -> PortResult<Response> {
        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream,
            options: self.options(&request.options),
        };
        debug!("POST /api/generate (stream: {}) with {} prompt chars", stream, request.prompt.len());
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, "ollama"))?;
        check_status(response, &format!("model {}", self.model)).await
    }

    async fn get_ok(&self, path: &str) -> PortResult<Response> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(e, "ollama"))?;
        check_status(response, path).await
    }
}

/// Splits complete lines off the front of `buffer` and decodes the fragments
/// they carry. The second value is true once a line reports `done`.
fn drain_lines(buffer: &mut BytesMut) -> (Vec<String>, bool) {
    let mut fragments = Vec::new();
    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(newline);
        buffer.advance(1);
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerateChunk>(line) {
            Ok(chunk) => {
                if !chunk.response.is_empty() {
                    fragments.push(chunk.response);
                }
                if chunk.done {
                    return (fragments, true);
                }
            }
            Err(e) => warn!("Skipping undecodable stream line: {}", e),
        }
    }
    (fragments, false)
}

#[async_trait]
impl LanguageModel for OllamaAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> PortResult<()> {
        self.get_ok("/api/version").await?;
        let tags: TagsResponse = self
            .get_ok("/api/tags")
            .await?
            .json()
            .await
            .map_err(|e| transport_error(e, "ollama"))?;

        if tags.models.iter().any(|m| m.name == self.model) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
            error!("Model {} not in available models: {:?}", self.model, available);
            Err(PortError::Unavailable(format!("model {} is not installed", self.model)))
        }
    }

    async fn generate(&self, request: &CompletionRequest) -> PortResult<String> {
        let chunk: GenerateChunk = self
            .post_generate(request, false)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(e, "ollama"))?;
        Ok(chunk.response)
    }

    async fn generate_stream(&self, request: &CompletionRequest) -> PortResult<TokenStream> {
        let response = self.post_generate(request, true).await?;
        info!("Streaming generation started on {}", self.model);

        let mut bytes = response.bytes_stream();
        let model = self.model.clone();
        let tokens = async_stream::stream! {
            let mut buffer = BytesMut::new();
            while let Some(next) = bytes.next().await {
                match next {
                    Ok(chunk) => {
                        buffer.extend_from_slice(&chunk);
                        let (fragments, done) = drain_lines(&mut buffer);
                        for fragment in fragments {
                            yield Ok(fragment);
                        }
                        if done {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(transport_error(e, "ollama"));
                        return;
                    }
                }
            }
            // A final line without a trailing newline.
            buffer.extend_from_slice(b"\n");
            let (fragments, done) = drain_lines(&mut buffer);
            for fragment in fragments {
                yield Ok(fragment);
            }
            if !done {
                error!("Generation stream of {} ended before completion", model);
                yield Err(PortError::Unexpected(
                    "generation stream ended before completion".to_string(),
                ));
            }
        };
        Ok(Box::pin(tokens))
    }
}
