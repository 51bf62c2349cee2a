//! Ollama 채팅 백엔드
//!
//! `POST /api/chat` (stream: true) 응답은 줄 단위 JSON(NDJSON)입니다.
//! 각 줄: `{"message":{"role":"assistant","content":"..."},"done":false}`
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;
use crate::error::{RagError, Result};
use crate::ollama::{OllamaClient, ProbeStatus};

use super::synth::{ChatMessage, CompletionBackend, CompletionRequest, FragmentStream};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// Ollama 채팅 구현체
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: OllamaClient,
    model: String,
}

impl OllamaChat {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = OllamaClient::new(config).map_err(|e| {
            RagError::configuration(format!("{:#}", e), "Check the Ollama settings (--ollama-url).")
        })?;
        Ok(Self {
            client,
            model: config.llm_model.clone(),
        })
    }

    fn unavailable(&self, message: String) -> RagError {
        RagError::GenerationUnavailable {
            message,
            hint: format!(
                "Start Ollama with `ollama serve` and pull the model with `ollama pull {}`, then ask again.",
                self.model
            ),
        }
    }
}

#[async_trait]
impl CompletionBackend for OllamaChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> Result<()> {
        match self.client.probe(&self.model).await {
            ProbeStatus::Ready => Ok(()),
            ProbeStatus::ModelMissing { model } => Err(RagError::GenerationUnavailable {
                message: format!("model '{}' is not pulled", model),
                hint: format!("Run `ollama pull {}`.", model),
            }),
            ProbeStatus::Unreachable { message } => Err(self.unavailable(format!(
                "Ollama is not reachable at {} ({})",
                self.client.base_url(),
                message
            ))),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: true,
        };

        tracing::debug!(
            "Sending chat request to {} ({} messages)",
            self.model,
            request.messages.len()
        );

        let response = self
            .client
            .http()
            .post(self.client.endpoint("api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("Failed to reach Ollama: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<OllamaError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(self.unavailable(format!("Ollama chat error ({}): {}", status, detail)));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| anyhow::anyhow!("Stream error: {}", e))
            })
            .boxed();

        Ok(ndjson_fragments(bytes))
    }
}

// ============================================================================
// NDJSON Stream
// ============================================================================

/// 한 줄 해석 결과
#[derive(Debug, PartialEq)]
enum LineEvent {
    Skip,
    Fragment { text: String, done: bool },
    Done,
    Error(String),
}

fn parse_line(line: &[u8]) -> LineEvent {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }

    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => return LineEvent::Error(format!("Invalid stream line: {}", e)),
    };

    if let Some(error) = chunk.error {
        return LineEvent::Error(format!("Ollama error: {}", error));
    }

    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    match (text.is_empty(), chunk.done) {
        (true, true) => LineEvent::Done,
        (true, false) => LineEvent::Skip,
        (false, done) => LineEvent::Fragment { text, done },
    }
}

struct NdjsonState {
    bytes: BoxStream<'static, anyhow::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    done: bool,
}

/// 바이트 스트림 → 텍스트 조각 스트림
///
/// `done` 줄 없이 연결이 끝나면 마지막 항목이 에러입니다.
fn ndjson_fragments(bytes: BoxStream<'static, anyhow::Result<Vec<u8>>>) -> FragmentStream {
    let state = NdjsonState {
        bytes,
        buffer: Vec::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            let newline = state.buffer.iter().position(|b| *b == b'\n');
            let line = match newline {
                Some(pos) => Some(state.buffer.drain(..=pos).collect::<Vec<u8>>()),
                None => match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.extend_from_slice(&chunk);
                        None
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                    None if !state.buffer.is_empty() => Some(std::mem::take(&mut state.buffer)),
                    None => {
                        state.done = true;
                        return Some((
                            Err(anyhow::anyhow!("Connection closed before the answer was complete")),
                            state,
                        ));
                    }
                },
            };

            let Some(line) = line else {
                continue;
            };

            match parse_line(&line) {
                LineEvent::Skip => continue,
                LineEvent::Fragment { text, done } => {
                    state.done = done;
                    return Some((Ok(text), state));
                }
                LineEvent::Done => {
                    state.done = true;
                    return None;
                }
                LineEvent::Error(message) => {
                    state.done = true;
                    return Some((Err(anyhow::anyhow!(message)), state));
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// Tests
// ============================================================================
