//! Session halves and the loops that drive them.
//!
//! A live session is split into a [`SessionSender`] shared by every task that
//! writes to the backend and a [`SessionReceiver`] owned by the receive loop,
//! which reads it one [`Turn`] at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregator::TurnAggregator;
use crate::gemini::{ClientMessage, FunctionResponse, Result, SessionEvent, Setup, TurnEvent};
use crate::memory::{Role, Transcript};
use crate::queue::{Interrupt, OutboundFrame, OutboundMultiplexer, RunFlag, StreamItem};

/// Write half of a live session.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn send(&self, msg: ClientMessage) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens live sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect and complete the setup handshake.
    async fn connect(&self, setup: Setup) -> Result<(SessionSender, SessionReceiver)>;
}

/// Cloneable handle on the session's write half.
#[derive(Clone)]
pub struct SessionSender {
    sink: Arc<dyn SessionSink>,
}

impl SessionSender {
    pub fn new(sink: impl SessionSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.sink.send(msg).await
    }

    pub async fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        self.send(ClientMessage::from_frame(frame)).await
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(ClientMessage::tool_response(responses)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.sink.close().await
    }
}

/// Read half of a live session.
pub struct SessionReceiver {
    rx: mpsc::Receiver<Result<SessionEvent>>,
    closed: bool,
}

impl SessionReceiver {
    pub fn new(rx: mpsc::Receiver<Result<SessionEvent>>) -> Self {
        Self { rx, closed: false }
    }

    /// Start reading the next turn.
    pub fn turn(&mut self) -> Turn<'_> {
        Turn {
            receiver: self,
            finished: false,
            completed: false,
        }
    }

    /// True once the connection has gone away and no more turns will arrive.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// One assistant turn: a lazy, finite sequence of [`TurnEvent`]s.
///
/// Ends at the backend's turn-complete marker. An error also ends the turn.
pub struct Turn<'a> {
    receiver: &'a mut SessionReceiver,
    finished: bool,
    completed: bool,
}

impl Turn<'_> {
    /// True once the backend has marked this turn complete.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub async fn next(&mut self) -> Option<Result<TurnEvent>> {
        if self.finished {
            return None;
        }

        loop {
            match self.receiver.rx.recv().await {
                None => {
                    self.receiver.closed = true;
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(SessionEvent::Turn(event))) => return Some(Ok(event)),
                Some(Ok(SessionEvent::TurnComplete)) => {
                    self.finished = true;
                    self.completed = true;
                    return None;
                }
                Some(Ok(SessionEvent::Interrupted)) => debug!("Backend reported generation interrupted"),
                Some(Ok(SessionEvent::ToolCallCancellation(ids))) => {
                    warn!("Tool calls cancelled by backend: {:?}", ids)
                }
                Some(Ok(SessionEvent::GoAway)) => warn!("Backend will close the session soon"),
                Some(Ok(SessionEvent::SetupComplete)) => {}
            }
        }
    }
}

/// Drain the outbound queue into the session, one frame at a time.
pub async fn run_sender(
    sender: SessionSender,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    running: RunFlag,
) {
    info!("Session sender started");
    while running.is_running() {
        let frame = tokio::select! {
            _ = running.stopped() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = sender.send_frame(&frame).await {
            error!("Failed to send {:?} frame: {}", frame.mime_type().unwrap_or("text"), e);
        }
    }
    info!("Session sender stopped");
}

/// Hand each inbound turn to the aggregator until the connection closes or
/// the run is stopped.
pub async fn run_receiver(
    mut receiver: SessionReceiver,
    mut aggregator: TurnAggregator,
    running: RunFlag,
) {
    info!("Session receiver started");
    while running.is_running() && !receiver.is_closed() {
        let mut turn = receiver.turn();
        let outcome = tokio::select! {
            _ = running.stopped() => break,
            outcome = aggregator.process_turn(&mut turn) => outcome,
        };

        if let Err(e) = outcome {
            if !running.is_running() {
                break;
            }
            error!("Error while receiving turn: {}", e);
        }
    }
    info!("Session receiver stopped");
}

/// Forward typed user lines into the session.
///
/// Each line interrupts whatever the assistant is still saying.
pub async fn run_user_text(
    mut user_text: mpsc::UnboundedReceiver<StreamItem<String>>,
    outbound: OutboundMultiplexer,
    interrupt: Interrupt,
    transcript: Transcript,
    running: RunFlag,
) {
    info!("User text loop started");
    while running.is_running() {
        let item = tokio::select! {
            _ = running.stopped() => break,
            item = user_text.recv() => item,
        };

        match item {
            Some(StreamItem::Data(text)) => {
                let epoch = interrupt.bump();
                debug!(epoch, "User text received, interrupting playback");
                transcript.record(Role::User, text.clone());
                if !outbound.push(OutboundFrame::Text(text)).await {
                    warn!("Outbound queue closed, dropping user text");
                    break;
                }
            }
            Some(StreamItem::EndOfStream) | None => break,
        }
    }
    info!("User text loop stopped");
}
