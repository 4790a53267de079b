//! Lifecycle of a run: connect, spawn the pipeline, shut it down.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregator::TurnAggregator;
use crate::audio::{self, AudioError, AudioSink, AudioSource};
use crate::config::{AgentConfig, CaptureMode};
use crate::error::Result;
use crate::events::EventSink;
use crate::memory::{format_transcript, MemoryStore, Transcript};
use crate::queue::{Interrupt, OutboundMultiplexer, RunFlag, StreamItem};
use crate::screen::{self, FrameError, FrameSource, LatestFrame};
use crate::session::{self, SessionConnector, SessionSender};
use crate::tools::ToolDispatcher;
use crate::tts::{TtsBridge, TtsConfig};

/// How long closing the session socket may take during shutdown.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens the blocking devices. Called on the device threads themselves.
pub trait DeviceFactory: Send + Sync {
    fn microphone(&self) -> std::result::Result<Box<dyn AudioSource>, AudioError>;
    fn speaker(&self) -> std::result::Result<Box<dyn AudioSink>, AudioError>;
    fn video(&self, mode: CaptureMode) -> std::result::Result<Box<dyn FrameSource>, FrameError>;
}

/// Devices of the machine we run on.
#[derive(Debug, Clone)]
pub struct SystemDevices {
    app_name: String,
    send_sample_rate: u32,
    receive_sample_rate: u32,
}

impl SystemDevices {
    pub fn new(app_name: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            app_name: app_name.into(),
            send_sample_rate: config.send_sample_rate,
            receive_sample_rate: config.receive_sample_rate,
        }
    }
}

impl DeviceFactory for SystemDevices {
    fn microphone(&self) -> std::result::Result<Box<dyn AudioSource>, AudioError> {
        audio::open_microphone(&self.app_name, self.send_sample_rate)
    }

    fn speaker(&self) -> std::result::Result<Box<dyn AudioSink>, AudioError> {
        audio::open_speaker(&self.app_name, self.receive_sample_rate)
    }

    fn video(&self, mode: CaptureMode) -> std::result::Result<Box<dyn FrameSource>, FrameError> {
        match mode {
            CaptureMode::Camera => screen::open_camera(),
            CaptureMode::Screen => screen::open_screen(),
            CaptureMode::None => Err(FrameError::Capture("no video source selected".to_string())),
        }
    }
}

/// How shutdown went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks had to be aborted after the shutdown timeout.
    pub forced: bool,
    /// Tasks that finished on their own.
    pub tasks_joined: usize,
}

/// Control surface for a running [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    running: RunFlag,
    user_text: mpsc::UnboundedSender<StreamItem<String>>,
    report: watch::Receiver<Option<ShutdownReport>>,
    shutdown_timeout: Duration,
}

impl OrchestratorHandle {
    /// Queue a line of user text. Returns `false` once the run has ended.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.running.is_running() && self.user_text.send(StreamItem::Data(text.into())).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Request shutdown and wait for it, up to the shutdown timeout.
    ///
    /// Returns `None` if the run did not report back in time.
    pub async fn stop(&self) -> Option<ShutdownReport> {
        self.running.stop();
        let _ = self.user_text.send(StreamItem::EndOfStream);

        let mut report = self.report.clone();
        let outcome = match tokio::time::timeout(self.shutdown_timeout, report.wait_for(Option::is_some)).await {
            Ok(Ok(reported)) => *reported,
            Ok(Err(_)) => {
                debug!("Orchestrator dropped before reporting shutdown");
                None
            }
            Err(_) => {
                warn!("Timed out waiting for shutdown");
                None
            }
        };
        outcome
    }
}

/// Owns the run flag and every task of the pipeline.
pub struct Orchestrator {
    config: AgentConfig,
    connector: Arc<dyn SessionConnector>,
    devices: Arc<dyn DeviceFactory>,
    tts: TtsConfig,
    memory: Option<Arc<dyn MemoryStore>>,
    events: EventSink,
    running: RunFlag,
    user_text_tx: mpsc::UnboundedSender<StreamItem<String>>,
    user_text_rx: mpsc::UnboundedReceiver<StreamItem<String>>,
    report_tx: watch::Sender<Option<ShutdownReport>>,
    preview_tx: watch::Sender<LatestFrame>,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        connector: Arc<dyn SessionConnector>,
        devices: Arc<dyn DeviceFactory>,
        tts: TtsConfig,
        events: EventSink,
    ) -> Self {
        let (user_text_tx, user_text_rx) = mpsc::unbounded_channel();
        let (report_tx, _) = watch::channel(None);
        let (preview_tx, _) = watch::channel(None);
        Self {
            config,
            connector,
            devices,
            tts,
            memory: None,
            events,
            running: RunFlag::new(),
            user_text_tx,
            user_text_rx,
            report_tx,
            preview_tx,
        }
    }

    /// Hand the transcript to `store` at shutdown.
    pub fn with_memory(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            running: self.running.clone(),
            user_text: self.user_text_tx.clone(),
            report: self.report_tx.subscribe(),
            shutdown_timeout: self.config.shutdown_timeout,
        }
    }

    /// Live preview frames, when a capture mode is active.
    pub fn preview(&self) -> watch::Receiver<LatestFrame> {
        self.preview_tx.subscribe()
    }

    /// Connect and run the pipeline until stopped.
    ///
    /// Failing to establish the session is fatal; everything after that is
    /// logged and survived.
    pub async fn run(self) -> Result<ShutdownReport> {
        let Self {
            config,
            connector,
            devices,
            tts,
            memory,
            events,
            running,
            user_text_tx,
            user_text_rx,
            report_tx,
            preview_tx,
        } = self;

        let recalled = match &memory {
            Some(store) => recall(store.as_ref(), &config.memory_user_id).await,
            None => None,
        };

        let (sender, receiver) = connector.connect(config.setup(recalled.as_deref())).await?;
        info!("Session established, starting pipeline ({:?} mode)", config.capture_mode);

        let (outbound, outbound_rx) = OutboundMultiplexer::new(config.outbound_capacity);
        let (tts_tx, tts_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let interrupt = Interrupt::new();
        let transcript = Transcript::new();

        let mut tasks = JoinSet::new();
        tasks.spawn(session::run_sender(sender.clone(), outbound_rx, running.clone()));

        let aggregator = TurnAggregator::new(
            sender.clone(),
            ToolDispatcher::new(config.workspace_root.clone()),
            tts_tx,
            events.clone(),
            interrupt.clone(),
            transcript.clone(),
        );
        let receiver_running = running.clone();
        tasks.spawn(async move {
            session::run_receiver(receiver, aggregator, receiver_running.clone()).await;
            if receiver_running.is_running() {
                warn!("Session closed by backend, stopping");
                receiver_running.stop();
            }
        });

        tasks.spawn(session::run_user_text(
            user_text_rx,
            outbound.clone(),
            interrupt.clone(),
            transcript.clone(),
            running.clone(),
        ));

        let bridge = TtsBridge::new(tts, playback_tx, events.clone(), interrupt.clone());
        tasks.spawn(bridge.run(tts_rx, running.clone()));

        let mut threads = Vec::new();

        let mic = devices.clone();
        match audio::spawn_capture(
            move || mic.microphone(),
            config.chunk_bytes(),
            outbound.clone(),
            running.clone(),
        ) {
            Ok(handle) => threads.push(handle),
            Err(e) => error!("{:#}", e),
        }

        let speaker = devices.clone();
        match audio::spawn_playback(
            move || speaker.speaker(),
            playback_rx,
            interrupt.clone(),
            running.clone(),
        ) {
            Ok(handle) => threads.push(handle),
            Err(e) => error!("{:#}", e),
        }

        if config.capture_mode != CaptureMode::None {
            let mode = config.capture_mode;
            let video = devices.clone();
            let latest = preview_tx.subscribe();
            match screen::spawn_sampler(
                move || video.video(mode),
                preview_tx,
                config.preview_interval,
                running.clone(),
            ) {
                Ok(handle) => threads.push(handle),
                Err(e) => error!("{:#}", e),
            }
            tasks.spawn(screen::run_downsampler(
                latest,
                outbound.clone(),
                config.frame_send_interval,
                config.thumbnail_size,
                running.clone(),
            ));
        }
        drop(outbound);

        let mut tasks_joined = 0;
        tokio::select! {
            _ = running.stopped() => info!("Stop requested"),
            _ = join_all(&mut tasks, &mut tasks_joined) => info!("All tasks finished"),
        }

        let report = shutdown(
            ShutdownContext {
                running,
                user_text: user_text_tx,
                tasks,
                tasks_joined,
                threads,
                sender,
                transcript,
                memory,
                memory_user_id: config.memory_user_id.clone(),
                recalled,
            },
            config.shutdown_timeout,
        )
        .await;

        report_tx.send_replace(Some(report));
        Ok(report)
    }
}

/// Memories to seed the session with. A failing store is logged and skipped.
async fn recall(store: &dyn MemoryStore, user_id: &str) -> Option<String> {
    match store.recall(user_id).await {
        Ok(recalled) => recalled,
        Err(e) => {
            warn!("Failed to recall memories: {}", e);
            None
        }
    }
}

async fn join_all(tasks: &mut JoinSet<()>, joined: &mut usize) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(()) => *joined += 1,
            Err(e) => error!("Task failed: {}", e),
        }
    }
}

struct ShutdownContext {
    running: RunFlag,
    user_text: mpsc::UnboundedSender<StreamItem<String>>,
    tasks: JoinSet<()>,
    tasks_joined: usize,
    threads: Vec<JoinHandle<()>>,
    sender: SessionSender,
    transcript: Transcript,
    memory: Option<Arc<dyn MemoryStore>>,
    memory_user_id: String,
    recalled: Option<String>,
}

/// Stop every task, then the devices, then hand off the transcript.
async fn shutdown(ctx: ShutdownContext, timeout: Duration) -> ShutdownReport {
    let ShutdownContext {
        running,
        user_text,
        mut tasks,
        mut tasks_joined,
        threads,
        sender,
        transcript,
        memory,
        memory_user_id,
        recalled,
    } = ctx;

    info!("Shutting down");
    running.stop();
    let _ = user_text.send(StreamItem::EndOfStream);

    let forced = match tokio::time::timeout(timeout, join_all(&mut tasks, &mut tasks_joined)).await {
        Ok(()) => false,
        Err(_) => {
            warn!("{} tasks still running after {:?}, aborting", tasks.len(), timeout);
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            true
        }
    };

    match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, sender.close()).await {
        Ok(Ok(())) => debug!("Session closed"),
        Ok(Err(e)) => debug!("Error closing session: {}", e),
        Err(_) => debug!("Timed out closing session"),
    }
    drop(sender);

    let device_threads = tokio::task::spawn_blocking(move || {
        for handle in threads {
            if handle.join().is_err() {
                error!("Device thread panicked");
            }
        }
    });
    if tokio::time::timeout(timeout, device_threads).await.is_err() {
        warn!("Device threads did not stop within {:?}", timeout);
    }

    if let Some(store) = memory.filter(|_| !transcript.is_empty()) {
        let messages = format_transcript(&transcript.entries(), recalled.as_deref());
        if messages.is_empty() {
            info!("No conversation to save");
        } else if let Err(e) = store.add(messages, &memory_user_id).await {
            error!("Failed to save transcript to memory: {}", e);
        }
    }

    let report = ShutdownReport {
        forced,
        tasks_joined,
    };
    info!(forced = report.forced, tasks_joined = report.tasks_joined, "Shutdown complete");
    report
}
