//! Gemini Live API wire protocol
//!
//! Message types exchanged with the Live API over its websocket, plus the
//! translation of raw server messages into [`SessionEvent`]s the rest of the
//! pipeline consumes.

use std::collections::BTreeMap;

use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::queue::OutboundFrame;

/// Media type sent on the wire for microphone audio.
pub const AUDIO_WIRE_MIME: &str = "audio/pcm;rate=16000";

/// Error type for Gemini API operations
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Setup not complete")]
    SetupNotComplete,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, GeminiError>;

/// Generation configuration for setup.
#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Part {
    pub text: String,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// One entry of the setup `tools` list.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ToolSpec {
    GoogleSearch {},
    CodeExecution {},
    FunctionDeclarations(Vec<FunctionDeclaration>),
}

/// A locally implemented function the model may call.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: String,
}

/// Session setup message.
#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

/// Base64 media payload.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

/// A chunk of realtime input (audio/video/text)
#[derive(Debug, Serialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// The answer to one [`FunctionCall`], keyed by its id.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Build the message carrying one outbound frame.
    pub fn from_frame(frame: &OutboundFrame) -> Self {
        match frame {
            OutboundFrame::Audio(data) => Self::RealtimeInput(RealtimeInput {
                audio: Some(Blob {
                    data: general_purpose::STANDARD.encode(data),
                    mime_type: AUDIO_WIRE_MIME.to_string(),
                }),
                ..Default::default()
            }),
            OutboundFrame::Image(data) => Self::RealtimeInput(RealtimeInput {
                video: Some(Blob {
                    data: general_purpose::STANDARD.encode(data),
                    mime_type: crate::queue::IMAGE_MIME.to_string(),
                }),
                ..Default::default()
            }),
            OutboundFrame::Text(text) => Self::user_text(text),
        }
    }

    /// A complete user turn. Empty input is sent as `"."`.
    pub fn user_text(text: &str) -> Self {
        let text = if text.is_empty() { "." } else { text };
        Self::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server -> client message. Every top-level field is optional; a single
/// message may carry several of them.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<Value>,
    pub session_resumption_update: Option<Value>,
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub executable_code: Option<ExecutableCode>,
    pub code_execution_result: Option<CodeExecutionResult>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutableCode {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct CodeExecutionResult {
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebSource {
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A request from the model to run a declared function.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// One event inside an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    TextDelta(String),
    /// All function calls carried by one inbound chunk.
    ToolCallRequest(Vec<FunctionCall>),
    /// Source URLs cited by one inbound chunk.
    GroundingReference(Vec<String>),
    CodeExecution {
        code: Option<String>,
        result: Option<String>,
    },
}

/// Decoded inbound session traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SetupComplete,
    Turn(TurnEvent),
    TurnComplete,
    Interrupted,
    ToolCallCancellation(Vec<String>),
    GoAway,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Flatten the message into events, in the order the pipeline must see
    /// them: tool calls and content first, the turn marker last.
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(SessionEvent::SetupComplete);
        }

        if let Some(tool_call) = self.tool_call {
            if !tool_call.function_calls.is_empty() {
                events.push(SessionEvent::Turn(TurnEvent::ToolCallRequest(
                    tool_call.function_calls,
                )));
            }
        }

        if let Some(content) = self.server_content {
            if let Some(grounding) = content.grounding_metadata {
                let urls: Vec<String> = grounding
                    .grounding_chunks
                    .into_iter()
                    .filter_map(|chunk| chunk.web.and_then(|web| web.uri))
                    .filter(|uri| !uri.is_empty())
                    .collect();
                if !urls.is_empty() {
                    events.push(SessionEvent::Turn(TurnEvent::GroundingReference(urls)));
                }
            }

            if let Some(model_turn) = content.model_turn {
                for part in model_turn.parts {
                    if part.executable_code.is_some() || part.code_execution_result.is_some() {
                        events.push(SessionEvent::Turn(TurnEvent::CodeExecution {
                            code: part.executable_code.map(|c| c.code),
                            result: part.code_execution_result.map(|r| r.output),
                        }));
                    }
                    if let Some(text) = part.text {
                        if !text.is_empty() {
                            events.push(SessionEvent::Turn(TurnEvent::TextDelta(text)));
                        }
                    }
                }
            }

            if content.interrupted {
                events.push(SessionEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(SessionEvent::TurnComplete);
            }
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(SessionEvent::ToolCallCancellation(cancellation.ids));
        }

        if self.go_away.is_some() {
            events.push(SessionEvent::GoAway);
        }

        events
    }
}
