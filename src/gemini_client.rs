//! Gemini Live API websocket client
//!
//! Connects to the Live endpoint, splits the websocket into a write half
//! (wrapped as a [`SessionSink`]) and a read half drained by a background
//! task, and performs the setup handshake.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::gemini::{ClientMessage, GeminiError, Result, ServerMessage, SessionEvent, Setup};
use crate::session::{SessionConnector, SessionReceiver, SessionSender, SessionSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live API endpoint, without the key parameter.
pub const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for `setupComplete` after sending the setup message.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound event channel.
const INBOUND_CAPACITY: usize = 100;

/// Write half of the Live websocket. The mutex keeps at most one send in
/// flight.
struct WsSessionSink {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl SessionSink for WsSessionSink {
    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!("Sending message ({} bytes)", json.len());
        self.sink.lock().await.send(Message::text(json)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

/// Connects to the Gemini Live API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    url: String,
}

impl GeminiClient {
    /// Client for an explicit websocket URL (used against local test servers).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Client for the public endpoint authenticated with `api_key`.
    pub fn from_api_key(base_url: &str, api_key: &str) -> Self {
        Self::new(format!("{}?key={}", base_url, api_key))
    }
}

#[async_trait]
impl SessionConnector for GeminiClient {
    async fn connect(&self, setup: Setup) -> Result<(SessionSender, SessionReceiver)> {
        info!("Connecting to Gemini API");
        let (ws_stream, resp) = connect_async(&self.url).await?;
        debug!("WebSocket connection response: {:?}", resp.status());

        let (sink, stream) = ws_stream.split();
        let sender = SessionSender::new(WsSessionSink {
            sink: Mutex::new(sink),
        });

        let (event_tx, mut event_rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(read_loop(stream, event_tx));

        info!("Sending setup message with model: {}", setup.model);
        sender.send(ClientMessage::Setup(setup)).await?;

        tokio::time::timeout(SETUP_TIMEOUT, wait_for_setup_complete(&mut event_rx))
            .await
            .map_err(|_| {
                error!("Timeout waiting for setup complete message");
                GeminiError::Timeout
            })??;

        info!("Gemini session setup complete");
        Ok((sender, SessionReceiver::new(event_rx)))
    }
}

async fn wait_for_setup_complete(
    event_rx: &mut mpsc::Receiver<Result<SessionEvent>>,
) -> Result<()> {
    loop {
        match event_rx.recv().await {
            Some(Ok(SessionEvent::SetupComplete)) => return Ok(()),
            Some(Ok(other)) => debug!("Ignoring {:?} before setup completed", other),
            Some(Err(e)) => return Err(e),
            None => return Err(GeminiError::SetupNotComplete),
        }
    }
}

/// Drain the read half, decoding every frame into session events.
async fn read_loop(mut stream: SplitStream<WsStream>, event_tx: mpsc::Sender<Result<SessionEvent>>) {
    info!("Inbound message task started");

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            // The Live API delivers JSON in binary frames as well.
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Received non-UTF-8 binary message ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed: {:?}", frame);
                let _ = event_tx.send(Err(GeminiError::ConnectionClosed)).await;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket error: {:?}", e);
                let _ = event_tx.send(Err(GeminiError::WebSocket(e))).await;
                break;
            }
        };

        match ServerMessage::parse(&text) {
            Ok(server_message) => {
                for event in server_message.into_events() {
                    if event_tx.send(Ok(event)).await.is_err() {
                        info!("Inbound receiver dropped, stopping read task");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to parse server message: {}", e);
                debug!("Raw message: {}", text);
                if event_tx.send(Err(e)).await.is_err() {
                    return;
                }
            }
        }
    }

    info!("Inbound message task terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{GenerationConfig, TurnEvent};
    use crate::queue::OutboundFrame;
    use serde_json::Value;
    use tokio::net::TcpListener;

    /// Accept one websocket client, answer setup, then echo a scripted turn
    /// once the first client content arrives.
    async fn fake_live_server(listener: TcpListener) -> Vec<Value> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut received = Vec::new();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value.get("setup").is_some() {
                ws.send(Message::text(r#"{"setupComplete":{}}"#)).await.unwrap();
            } else if value.get("clientContent").is_some() {
                let turn = serde_json::json!({
                    "serverContent": {"modelTurn": {"parts": [{"text": "Hi there"}]}, "turnComplete": true}
                });
                ws.send(Message::binary(turn.to_string().into_bytes())).await.unwrap();
            }
            let done = value.get("clientContent").is_some();
            received.push(value);
            if done {
                break;
            }
        }
        received
    }

    #[tokio::test]
    async fn test_connect_setup_and_turn() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_live_server(listener));

        let client = GeminiClient::new(format!("ws://{}", addr));
        let setup = Setup {
            model: "models/test".into(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT".into()],
                max_output_tokens: Some(100),
                temperature: None,
            }),
            ..Default::default()
        };
        let (sender, mut receiver) = client.connect(setup).await.unwrap();

        sender
            .send_frame(&OutboundFrame::Audio(vec![0; 4]))
            .await
            .unwrap();
        sender
            .send_frame(&OutboundFrame::Text("hello".into()))
            .await
            .unwrap();

        let mut turn = receiver.turn();
        assert_eq!(
            turn.next().await.unwrap().unwrap(),
            TurnEvent::TextDelta("Hi there".into())
        );
        assert!(turn.next().await.is_none());

        let received = server.await.unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0]["setup"]["model"], "models/test");
        assert!(received[1]["realtimeInput"]["audio"].is_object());
        assert_eq!(received[2]["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_setup_fails_when_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let client = GeminiClient::new(format!("ws://{}", addr));
        let result = client.connect(Setup::default()).await;
        assert!(result.is_err());
    }
}
