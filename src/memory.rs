//! Conversation transcript and the hand-off to an external memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// mem0 hosted API.
pub const MEM0_API_URL: &str = "https://api.mem0.ai";

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Memory store rejected transcript: {status} {body}")]
    Rejected { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

/// Shared, append-only log of what was said during the run.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, role: Role, content: impl Into<String>) {
        let entry = TranscriptEntry {
            role,
            content: content.into(),
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Prepare entries for the memory store: contents are trimmed, empty entries
/// dropped, and entries echoing previously recalled memories (`recalled`)
/// skipped so the store does not ingest its own output.
pub fn format_transcript(entries: &[TranscriptEntry], recalled: Option<&str>) -> Vec<TranscriptEntry> {
    entries
        .iter()
        .filter(|entry| match recalled {
            Some(memory) if !memory.is_empty() => !entry.content.contains(memory),
            _ => true,
        })
        .map(|entry| TranscriptEntry {
            role: entry.role,
            content: entry.content.trim().to_string(),
        })
        .filter(|entry| !entry.content.is_empty())
        .collect()
}

/// Somewhere to persist a finished conversation.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, messages: Vec<TranscriptEntry>, user_id: &str) -> Result<()>;

    /// Everything remembered about `user_id`, serialized for the model.
    /// `None` when nothing is stored.
    async fn recall(&self, _user_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// One stored memory as returned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecalledMemory {
    pub memory: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Context line prepended to the session's instructions.
pub fn recall_instruction(user_id: &str, recalled: &str) -> String {
    format!(
        "The user's name is {}, and this is relevant context about them: {}.",
        user_id, recalled
    )
}

#[derive(Serialize)]
struct AddMemoriesRequest<'a> {
    messages: &'a [TranscriptEntry],
    user_id: &'a str,
}

/// mem0 REST client.
pub struct Mem0Client {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Mem0Client {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl MemoryStore for Mem0Client {
    async fn add(&self, messages: Vec<TranscriptEntry>, user_id: &str) -> Result<()> {
        let url = format!("{}/v1/memories/", self.base_url.trim_end_matches('/'));
        debug!(url = %url, count = messages.len(), "Posting transcript to memory store");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&AddMemoriesRequest {
                messages: &messages,
                user_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Transcript saved to memory ({} messages)", messages.len());
        Ok(())
    }

    async fn recall(&self, user_id: &str) -> Result<Option<String>> {
        let url = format!("{}/v1/memories/", self.base_url.trim_end_matches('/'));
        debug!(url = %url, "Fetching memories");

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .query(&[("user_id", user_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let memories: Vec<RecalledMemory> = response.json().await?;
        if memories.is_empty() {
            return Ok(None);
        }
        info!("Recalled {} memories for {}", memories.len(), user_id);
        Ok(serde_json::to_string(&memories).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_format_transcript() {
        let transcript = Transcript::new();
        transcript.record(Role::Assistant, "Context: [{\"memory\":\"likes tea\"}]");
        transcript.record(Role::User, "  make a folder  ");
        transcript.record(Role::Assistant, "   ");
        transcript.record(Role::Assistant, "Done.");

        let formatted = format_transcript(&transcript.entries(), Some("[{\"memory\":\"likes tea\"}]"));
        assert_eq!(
            formatted,
            vec![
                TranscriptEntry {
                    role: Role::User,
                    content: "make a folder".into()
                },
                TranscriptEntry {
                    role: Role::Assistant,
                    content: "Done.".into()
                },
            ]
        );

        assert_eq!(format_transcript(&transcript.entries(), None).len(), 3);
    }

    #[test]
    fn test_role_serialization() {
        let entry = TranscriptEntry {
            role: Role::User,
            content: "hi".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    /// Answer one HTTP request with `body`, returning the raw request.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (format!("http://{}", addr), server)
    }

    #[tokio::test]
    async fn test_mem0_client_posts_transcript() {
        let (url, server) = serve_once("[]").await;

        let client = Mem0Client::new(url, "secret");
        client
            .add(
                vec![TranscriptEntry {
                    role: Role::User,
                    content: "hello".into(),
                }],
                "ada-user",
            )
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/memories/ HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: token secret"));
        assert!(request.contains(r#""user_id":"ada-user""#));
        assert!(request.contains(r#""role":"user""#));
    }

    #[tokio::test]
    async fn test_mem0_client_recalls_memories() {
        let (url, server) =
            serve_once(r#"[{"id":"1","memory":"Likes tea","updated_at":"2025-01-01T00:00:00Z"}]"#).await;
        let client = Mem0Client::new(url, "secret");

        let recalled = client.recall("ada-user").await.unwrap().unwrap();
        let memories: Vec<RecalledMemory> = serde_json::from_str(&recalled).unwrap();
        assert_eq!(memories[0].memory, "Likes tea");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v1/memories/?user_id=ada-user HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: token secret"));

        let instruction = recall_instruction("ada-user", &recalled);
        assert!(instruction.contains("ada-user") && instruction.contains("Likes tea"));
    }

    #[tokio::test]
    async fn test_empty_store_recalls_nothing() {
        let (url, server) = serve_once("[]").await;
        let client = Mem0Client::new(url, "secret");
        assert_eq!(client.recall("ada-user").await.unwrap(), None);
        server.await.unwrap();
    }
}
