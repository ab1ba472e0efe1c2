//! Shopping-agent chat over server-sent events.
//!
//! The agent streams `data: {...}\n\n` frames whose `content.parts` carry
//! text deltas, tool calls and tool results. [`SseDecoder`] turns raw bytes
//! into [`AgentEvent`]s once, so callers match on a closed enum instead of
//! probing JSON.

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// One decoded agent event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    TextDelta(String),
    FunctionCall {
        name: String,
        args: serde_json::Value,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct WireFunctionResponse {
    name: String,
    #[serde(default)]
    response: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamFrame {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    app_name: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    new_message: Content,
    streaming: bool,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
}

/// Decode one SSE frame (without the trailing blank line).
fn decode_frame(frame: &str) -> Result<Vec<AgentEvent>, AgentError> {
    let payload = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n");
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }

    let frame: StreamFrame = serde_json::from_str(&payload)?;
    if let Some(err) = frame.error {
        return Err(AgentError::Api(format!("agent stream error: {err}")));
    }

    let parts = frame.content.map(|c| c.parts).unwrap_or_default();
    Ok(parts
        .into_iter()
        .filter_map(|part| {
            if let Some(call) = part.function_call {
                Some(AgentEvent::FunctionCall {
                    name: call.name,
                    args: call.args,
                })
            } else if let Some(resp) = part.function_response {
                Some(AgentEvent::FunctionResponse {
                    name: resp.name,
                    response: resp.response,
                })
            } else {
                part.text
                    .filter(|t| !t.is_empty())
                    .map(AgentEvent::TextDelta)
            }
        })
        .collect())
}

/// Incremental SSE decoder. Frames may be split across network chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the events of every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<AgentEvent>, AgentError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((end, sep)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep).collect();
            let text = String::from_utf8_lossy(&frame[..end]);
            events.extend(decode_frame(&text)?);
        }
        Ok(events)
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Result<Vec<AgentEvent>, AgentError> {
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&String::from_utf8_lossy(&rest))
    }
}

/// Position and length of the first blank-line separator.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// A chat session with the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
}

/// Random user id for visitors who have not identified themselves.
pub fn anonymous_user_id() -> String {
    format!("anon-{}", uuid::Uuid::new_v4())
}

pub struct ChatClient {
    http: reqwest::Client,
    agent_url: String,
    app: String,
    public_key: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            http,
            agent_url: config.agent_url.clone(),
            app: config.agent_app.clone(),
            public_key: config.public_key.clone(),
        }
    }

    pub async fn create_session(&self, user_id: &str) -> Result<ChatSession, AgentError> {
        let url = format!(
            "{}apps/{}/users/{}/sessions",
            self.agent_url,
            urlencoding::encode(&self.app),
            urlencoding::encode(user_id),
        );
        let resp = self
            .http
            .post(&url)
            .header("x-public-key", &self.public_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| AgentError::Http(format!("create session request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Api(format!("create session response parse failed: {e}")))?;
        tracing::info!(session = %session.id, user = user_id, "chat session created");
        Ok(ChatSession {
            id: session.id,
            user_id: user_id.to_string(),
        })
    }

    /// Send `text` and deliver each streamed event to `on_event` as it arrives.
    pub async fn send_message<F>(
        &self,
        session: &ChatSession,
        text: &str,
        mut on_event: F,
    ) -> Result<(), AgentError>
    where
        F: FnMut(AgentEvent) + Send,
    {
        let body = RunRequest {
            app_name: &self.app,
            user_id: &session.user_id,
            session_id: &session.id,
            new_message: Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    ..Default::default()
                }],
            },
            streaming: true,
        };

        let mut resp = self
            .http
            .post(format!("{}run_sse", self.agent_url))
            .header("x-public-key", &self.public_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Http(format!("chat request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let mut decoder = SseDecoder::new();
        let mut count = 0usize;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| AgentError::Http(format!("chat stream interrupted: {e}")))?
        {
            for event in decoder.push(&chunk)? {
                count += 1;
                on_event(event);
            }
        }
        for event in decoder.finish()? {
            count += 1;
            on_event(event);
        }

        tracing::debug!(session = %session.id, events = count, "chat stream finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_text_and_function_parts() {
        let frame = r#"data: {"content":{"role":"model","parts":[{"text":"Hi"},{"functionCall":{"name":"search_offers","args":{"q":"shoes"}}}]}}"#;
        let events = decode_frame(frame).unwrap();
        assert_eq!(
            events,
            vec![
                AgentEvent::TextDelta("Hi".to_string()),
                AgentEvent::FunctionCall {
                    name: "search_offers".to_string(),
                    args: serde_json::json!({"q": "shoes"}),
                },
            ]
        );
    }

    #[test]
    fn test_function_response_part() {
        let frame = r#"data: {"content":{"parts":[{"functionResponse":{"name":"search_offers","response":{"offers":[]}}}]}}"#;
        let events = decode_frame(frame).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::FunctionResponse {
                name: "search_offers".to_string(),
                response: serde_json::json!({"offers": []}),
            }]
        );
    }

    #[test]
    fn test_decoder_handles_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let stream = "data: {\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}\n\ndata: {\"content\":{\"parts\":[{\"text\":\"lo\"}]}}\n\n";
        let (a, b) = stream.split_at(20);

        let mut events = decoder.push(a.as_bytes()).unwrap();
        assert!(events.is_empty());
        events.extend(decoder.push(b.as_bytes()).unwrap());
        events.extend(decoder.finish().unwrap());

        assert_eq!(
            events,
            vec![
                AgentEvent::TextDelta("Hel".to_string()),
                AgentEvent::TextDelta("lo".to_string()),
            ]
        );
    }

    #[test]
    fn test_decoder_accepts_crlf_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b": keep-alive\r\n\r\ndata: {\"content\":{\"parts\":[{\"text\":\"ok\"}]}}\r\n\r\n")
            .unwrap();
        assert_eq!(events, vec![AgentEvent::TextDelta("ok".to_string())]);
    }

    #[test]
    fn test_error_frame_is_surfaced() {
        let err = decode_frame(r#"data: {"error":"model overloaded"}"#).unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_anonymous_user_ids_are_unique() {
        assert_ne!(anonymous_user_id(), anonymous_user_id());
    }
}
