//! Streaming text-to-speech over the ElevenLabs stream-input websocket.
//!
//! Text arrives on the TTS queue as [`StreamItem`]s. The first chunk of an
//! utterance opens a socket, each further chunk is forwarded as it arrives,
//! and [`StreamItem::EndOfStream`] sends the finalize marker. A listener task
//! decodes the returned PCM into the playback queue until the service reports
//! `isFinal`.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::{CoreEvent, EventSink};
use crate::queue::{Interrupt, PlaybackChunk, RunFlag, Stamped, StreamItem, TtsItem};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ELEVENLABS_WS_URL: &str = "wss://api.elevenlabs.io";

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run stopped while streaming")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, TtsError>;

/// Where and how to synthesize speech.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    pub api_key: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Upper bound on waiting for the service to finish an utterance after
    /// the finalize marker.
    pub listen_timeout: Duration,
}

impl TtsConfig {
    pub fn new(voice_id: impl Into<String>, model_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: ELEVENLABS_WS_URL.to_string(),
            voice_id: voice_id.into(),
            model_id: model_id.into(),
            api_key: api_key.into(),
            stability: 0.5,
            similarity_boost: 0.8,
            listen_timeout: Duration::from_secs(10),
        }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream-input?model_id={}&output_format=pcm_24000",
            self.base_url.trim_end_matches('/'),
            self.voice_id,
            self.model_id
        )
    }
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct InitMessage<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
    xi_api_key: &'a str,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AudioMessage {
    audio: Option<String>,
    #[serde(default)]
    is_final: Option<bool>,
}

/// Where an utterance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
    Idle,
    Connecting,
    Streaming,
    Finalizing,
    Closed,
}

/// Open speech-synthesis socket for one utterance.
struct Utterance {
    sink: SplitSink<WsStream, Message>,
    listener: JoinHandle<usize>,
}

impl Utterance {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        let json = serde_json::to_string(&TextMessage { text })?;
        self.sink.send(Message::text(json)).await?;
        Ok(())
    }
}

impl Drop for Utterance {
    fn drop(&mut self) {
        // The listener holds a playback sender; it must not outlive the socket.
        self.listener.abort();
    }
}

/// Run `fut` unless the run is stopped first.
async fn unless_stopped<F: Future>(running: &RunFlag, fut: F) -> Result<F::Output> {
    tokio::select! {
        _ = running.stopped() => Err(TtsError::Stopped),
        output = fut => Ok(output),
    }
}

/// Bridges assistant text to synthesized PCM.
pub struct TtsBridge {
    config: TtsConfig,
    playback: mpsc::UnboundedSender<PlaybackChunk>,
    events: EventSink,
    interrupt: Interrupt,
    state: TtsState,
}

impl TtsBridge {
    pub fn new(
        config: TtsConfig,
        playback: mpsc::UnboundedSender<PlaybackChunk>,
        events: EventSink,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            config,
            playback,
            events,
            interrupt,
            state: TtsState::Idle,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> TtsState {
        self.state
    }

    fn transition(&mut self, state: TtsState) {
        debug!("TTS state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Consume the TTS queue until it closes or the run stops.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<TtsItem>, running: RunFlag) {
        info!("TTS bridge started");
        while running.is_running() {
            let item = tokio::select! {
                _ = running.stopped() => break,
                item = input.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match item.item {
                StreamItem::EndOfStream => debug!("End of stream while idle, ignoring"),
                StreamItem::Data(_) if self.interrupt.is_stale(item.epoch) => {
                    debug!("Skipping interrupted text chunk");
                }
                StreamItem::Data(text) => {
                    self.events.publish(CoreEvent::SpeakingStarted);
                    if let Err(e) = self.speak(&text, item.epoch, &mut input, &running).await {
                        match e {
                            TtsError::Stopped => debug!("TTS utterance cut short by shutdown"),
                            e => error!("TTS error while {:?}: {}", self.state, e),
                        }
                    }
                    self.events.publish(CoreEvent::SpeakingStopped);
                    self.transition(TtsState::Idle);
                }
            }
        }
        info!("TTS bridge stopped");
    }

    /// Stream one utterance, starting with `first`, through to its
    /// end-of-stream marker.
    async fn speak(
        &mut self,
        first: &str,
        epoch: u64,
        input: &mut mpsc::UnboundedReceiver<TtsItem>,
        running: &RunFlag,
    ) -> Result<()> {
        self.transition(TtsState::Connecting);
        let mut utterance = unless_stopped(running, self.open(epoch)).await??;

        self.transition(TtsState::Streaming);
        unless_stopped(running, utterance.send_text(&format!("{} ", first))).await??;

        loop {
            let item = unless_stopped(running, input.recv()).await?;

            match item {
                Some(Stamped { item: StreamItem::Data(text), epoch }) => {
                    if self.interrupt.is_stale(epoch) {
                        debug!("Skipping interrupted text chunk");
                        continue;
                    }
                    unless_stopped(running, utterance.send_text(&format!("{} ", text))).await??;
                }
                Some(Stamped { item: StreamItem::EndOfStream, .. }) | None => break,
            }
        }

        self.transition(TtsState::Finalizing);
        unless_stopped(running, utterance.send_text("")).await??;

        let listen_timeout = self.config.listen_timeout;
        match unless_stopped(running, tokio::time::timeout(listen_timeout, &mut utterance.listener)).await? {
            Ok(Ok(chunks)) => debug!("Utterance finished with {} audio chunks", chunks),
            Ok(Err(e)) => warn!("TTS listener task failed: {}", e),
            Err(_) => warn!("Timed out waiting for final TTS audio"),
        }

        self.transition(TtsState::Closed);
        if let Err(e) = unless_stopped(running, utterance.sink.close()).await? {
            debug!("Error closing TTS socket: {}", e);
        }
        Ok(())
    }

    async fn open(&self, epoch: u64) -> Result<Utterance> {
        let (ws_stream, _) = connect_async(self.config.stream_url()).await?;
        let (mut sink, stream) = ws_stream.split();

        let init = serde_json::to_string(&InitMessage {
            text: " ",
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
            xi_api_key: &self.config.api_key,
        })?;
        sink.send(Message::text(init)).await?;

        let listener = tokio::spawn(listen(stream, self.playback.clone(), epoch));
        Ok(Utterance { sink, listener })
    }
}

/// Decode audio messages into the playback queue until `isFinal`. Returns the
/// number of chunks queued.
async fn listen(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    playback: mpsc::UnboundedSender<PlaybackChunk>,
    epoch: u64,
) -> usize {
    let mut chunks = 0;
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("TTS socket error: {}", e);
                break;
            }
        };

        let message: AudioMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unparseable TTS message: {}", e);
                continue;
            }
        };

        if let Some(audio) = message.audio.filter(|audio| !audio.is_empty()) {
            match general_purpose::STANDARD.decode(audio) {
                Ok(pcm) => {
                    chunks += 1;
                    if playback.send(Stamped::new(epoch, pcm)).is_err() {
                        debug!("Playback queue closed");
                        break;
                    }
                }
                Err(e) => warn!("Invalid base64 audio from TTS: {}", e),
            }
        } else if message.is_final.unwrap_or(false) {
            break;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let config = TtsConfig::new("voice", "eleven_turbo_v2_5", "key");
        assert_eq!(
            config.stream_url(),
            "wss://api.elevenlabs.io/v1/text-to-speech/voice/stream-input?model_id=eleven_turbo_v2_5&output_format=pcm_24000"
        );
    }

    #[test]
    fn test_init_message() {
        let json = serde_json::to_value(InitMessage {
            text: " ",
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.8,
            },
            xi_api_key: "key",
        })
        .unwrap();
        assert_eq!(json["text"], " ");
        assert_eq!(json["voice_settings"]["stability"], 0.5);
        assert_eq!(json["xi_api_key"], "key");
    }

    #[test]
    fn test_audio_message_parsing() {
        let msg: AudioMessage = serde_json::from_str(r#"{"audio": "AAA=", "isFinal": null}"#).unwrap();
        assert_eq!(msg.audio.as_deref(), Some("AAA="));
        let msg: AudioMessage = serde_json::from_str(r#"{"isFinal": true}"#).unwrap();
        assert_eq!(msg.is_final, Some(true));
    }

    #[tokio::test]
    async fn test_end_of_stream_while_idle_is_ignored() {
        let (playback_tx, mut playback_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut config = TtsConfig::new("v", "m", "k");
        // Nothing listens here; connecting would fail.
        config.base_url = "ws://127.0.0.1:9".into();
        let bridge = TtsBridge::new(config, playback_tx, EventSink::new(events_tx), Interrupt::new());
        assert_eq!(bridge.state(), TtsState::Idle);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Stamped::new(0, StreamItem::EndOfStream)).unwrap();
        tx.send(Stamped::new(0, StreamItem::EndOfStream)).unwrap();
        drop(tx);
        bridge.run(rx, RunFlag::new()).await;

        assert!(events_rx.try_recv().is_err());
        assert!(playback_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle() {
        let (playback_tx, _playback_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut config = TtsConfig::new("v", "m", "k");
        config.base_url = "ws://127.0.0.1:9".into();
        let bridge = TtsBridge::new(config, playback_tx, EventSink::new(events_tx), Interrupt::new());

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Stamped::new(0, StreamItem::Data("hello".into()))).unwrap();
        tx.send(Stamped::new(0, StreamItem::EndOfStream)).unwrap();
        drop(tx);
        bridge.run(rx, RunFlag::new()).await;

        assert_eq!(events_rx.try_recv().unwrap(), CoreEvent::SpeakingStarted);
        assert_eq!(events_rx.try_recv().unwrap(), CoreEvent::SpeakingStopped);
    }

    #[tokio::test]
    async fn test_stop_while_finalizing_exits_promptly() {
        use tokio::net::TcpListener;
        use tokio_tungstenite::accept_async;

        // A synthesis server that takes the finalize marker but never sends
        // `isFinal`.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (finalized_tx, finalized_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut finalized_tx = Some(finalized_tx);
            while let Some(Ok(message)) = ws.next().await {
                let Ok(text) = message.to_text() else {
                    continue;
                };
                let is_finalize = serde_json::from_str::<serde_json::Value>(text)
                    .map(|value| value["text"] == "")
                    .unwrap_or(false);
                if is_finalize {
                    if let Some(tx) = finalized_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        });

        let (playback_tx, mut playback_rx) = mpsc::unbounded_channel();
        let mut config = TtsConfig::new("v", "m", "k");
        config.base_url = format!("ws://{}", addr);
        assert_eq!(config.listen_timeout, Duration::from_secs(10));
        let bridge = TtsBridge::new(config, playback_tx, EventSink::disconnected(), Interrupt::new());

        let (tx, rx) = mpsc::unbounded_channel();
        let running = RunFlag::new();
        let task = tokio::spawn(bridge.run(rx, running.clone()));
        tx.send(Stamped::new(0, StreamItem::Data("hello".into()))).unwrap();
        tx.send(Stamped::new(0, StreamItem::EndOfStream)).unwrap();

        finalized_rx.await.unwrap();
        running.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("bridge should stop well before the listen timeout")
            .unwrap();

        // The listener went away with the utterance, releasing playback.
        let closed = tokio::time::timeout(Duration::from_secs(1), playback_rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn test_stale_text_is_skipped() {
        let (playback_tx, _playback_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let interrupt = Interrupt::new();
        interrupt.bump();
        let bridge = TtsBridge::new(
            TtsConfig::new("v", "m", "k"),
            playback_tx,
            EventSink::new(events_tx),
            interrupt,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Stamped::new(0, StreamItem::Data("old".into()))).unwrap();
        tx.send(Stamped::new(0, StreamItem::EndOfStream)).unwrap();
        drop(tx);
        bridge.run(rx, RunFlag::new()).await;

        assert!(events_rx.try_recv().is_err(), "no utterance should start");
    }
}
