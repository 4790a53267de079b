//! Ada Live - real-time multimodal assistant core
//!
//! Microphone audio, optional camera or screen frames and typed text stream
//! into a Gemini Live session. Replies are spoken through ElevenLabs streaming
//! synthesis, and function calls are served by local filesystem tools.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod gemini;
pub mod gemini_client;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod screen;
pub mod session;
pub mod tools;
pub mod tts;

pub use config::{AgentConfig, CaptureMode, Credentials};
pub use error::CoreError;
pub use events::{CoreEvent, EventSink, TurnActivity};
pub use orchestrator::{Orchestrator, OrchestratorHandle, ShutdownReport, SystemDevices};
