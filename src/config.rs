//! Run configuration and credentials.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::gemini::{Content, GenerationConfig, Setup, ToolSpec};
use crate::gemini_client::LIVE_API_URL;
use crate::memory::{recall_instruction, MEM0_API_URL};
use crate::queue::OUTBOUND_CAPACITY;
use crate::tools;
use crate::tts::{TtsConfig, ELEVENLABS_WS_URL};

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const ELEVENLABS_API_KEY_VAR: &str = "ELEVENLABS_API_KEY";
pub const MEM0_API_KEY_VAR: &str = "MEM0_API_KEY";

const SYSTEM_INSTRUCTION: &str = "Your name is Ada and you are my AI assistant.
You have access to tools for searching, code execution, and system actions.
The user may provide a live video stream from their webcam or their screen.
Ignore the video unless the user explicitly asks you to analyze or comment on what you see.
Follow these guidelines when choosing tools:
1. For information or questions, use Google Search.
2. For math or running python code, use code execution.
3. Use the file system functions (create_folder, create_file, edit_file, list_files, read_file) for any file-related tasks.
4. If the user asks to open a website or a URL, you must use the open_website function.
5. If the user asks to open or launch an application, use the open_application function.
Prioritize the most appropriate tool for the user's specific request.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credential: set the {0} environment variable")]
    MissingCredential(&'static str),
}

/// Which video source, if any, accompanies the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CaptureMode {
    Camera,
    Screen,
    #[default]
    None,
}

/// API keys read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub elevenlabs_api_key: String,
    pub mem0_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini_api_key", &"***")
            .field("elevenlabs_api_key", &"***")
            .field("mem0_api_key", &self.mem0_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build credentials from an arbitrary variable lookup. Empty values count
    /// as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Ok(Self {
            gemini_api_key: get(GEMINI_API_KEY_VAR)
                .ok_or(ConfigError::MissingCredential(GEMINI_API_KEY_VAR))?,
            elevenlabs_api_key: get(ELEVENLABS_API_KEY_VAR)
                .ok_or(ConfigError::MissingCredential(ELEVENLABS_API_KEY_VAR))?,
            mem0_api_key: get(MEM0_API_KEY_VAR),
        })
    }
}

/// Everything tunable about a run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub system_instruction: String,
    pub voice_id: String,
    pub tts_model: String,
    pub send_sample_rate: u32,
    pub receive_sample_rate: u32,
    /// Microphone frames per captured chunk.
    pub chunk_frames: usize,
    pub outbound_capacity: usize,
    pub frame_send_interval: Duration,
    pub preview_interval: Duration,
    /// Longest edge of the thumbnail sent to the model.
    pub thumbnail_size: u32,
    pub shutdown_timeout: Duration,
    pub capture_mode: CaptureMode,
    /// Directory the filesystem tools operate in.
    pub workspace_root: PathBuf,
    pub gemini_url: String,
    pub tts_url: String,
    pub mem0_url: String,
    /// User id the transcript is stored under.
    pub memory_user_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-live-2.5-flash-preview".to_string(),
            max_output_tokens: 100,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            voice_id: "pFZP5JQG7iQjIQuC4Bku".to_string(),
            tts_model: "eleven_turbo_v2_5".to_string(),
            send_sample_rate: 16000,
            receive_sample_rate: 24000,
            chunk_frames: 1024,
            outbound_capacity: OUTBOUND_CAPACITY,
            frame_send_interval: Duration::from_secs(1),
            preview_interval: Duration::from_millis(33),
            thumbnail_size: 1024,
            shutdown_timeout: Duration::from_secs(5),
            capture_mode: CaptureMode::None,
            workspace_root: PathBuf::from("."),
            gemini_url: LIVE_API_URL.to_string(),
            tts_url: ELEVENLABS_WS_URL.to_string(),
            mem0_url: MEM0_API_URL.to_string(),
            memory_user_id: "ada-user".to_string(),
        }
    }
}

impl AgentConfig {
    /// Session setup: text responses, search, code execution and the local
    /// function declarations. Recalled memories, if any, are appended to the
    /// system instruction.
    pub fn setup(&self, recalled: Option<&str>) -> Setup {
        let system_instruction = match recalled {
            Some(recalled) => format!(
                "{}\n\n{}",
                self.system_instruction,
                recall_instruction(&self.memory_user_id, recalled)
            ),
            None => self.system_instruction.clone(),
        };
        Setup {
            model: self.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT".to_string()],
                max_output_tokens: Some(self.max_output_tokens),
                temperature: None,
            }),
            system_instruction: Some(Content::text(None, system_instruction)),
            tools: vec![
                ToolSpec::GoogleSearch {},
                ToolSpec::CodeExecution {},
                ToolSpec::FunctionDeclarations(tools::declarations()),
            ],
        }
    }

    pub fn tts(&self, api_key: &str) -> TtsConfig {
        let mut config = TtsConfig::new(&self.voice_id, &self.tts_model, api_key);
        config.base_url = self.tts_url.clone();
        config
    }

    /// Bytes in one captured microphone chunk (mono S16LE).
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames * 2
    }
}
