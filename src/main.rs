//! Ada - talk to a Gemini Live assistant from the terminal.
//!
//! Typed lines are sent as user turns; the microphone and the optional video
//! source stream in the background. Assistant text is printed as it arrives
//! and spoken through ElevenLabs.

#![forbid(unsafe_code)]

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ada_live::gemini_client::GeminiClient;
use ada_live::memory::Mem0Client;
use ada_live::{
    AgentConfig, CaptureMode, CoreEvent, Credentials, EventSink, Orchestrator, SystemDevices, TurnActivity,
};
use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ada", about = "Real-time voice assistant on the Gemini Live API")]
struct Args {
    /// Video source streamed alongside the microphone
    #[arg(long, value_enum, default_value_t = CaptureMode::None)]
    mode: CaptureMode,

    /// Directory the filesystem tools operate in
    #[arg(long, env = "ADA_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// User id the conversation is remembered under
    #[arg(long, env = "ADA_USER_ID", default_value = "ada-user")]
    user_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let credentials = Credentials::from_env()?;

    let config = AgentConfig {
        capture_mode: args.mode,
        workspace_root: args.workspace,
        memory_user_id: args.user_id,
        ..AgentConfig::default()
    };
    info!("Starting Ada ({:?} mode, workspace {})", config.capture_mode, config.workspace_root.display());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(GeminiClient::from_api_key(&config.gemini_url, &credentials.gemini_api_key));
    let devices = Arc::new(SystemDevices::new("ada", &config));
    let tts = config.tts(&credentials.elevenlabs_api_key);
    let mem0_url = config.mem0_url.clone();

    let mut orchestrator = Orchestrator::new(config, connector, devices, tts, EventSink::new(events_tx));
    match credentials.mem0_api_key {
        Some(key) => orchestrator = orchestrator.with_memory(Arc::new(Mem0Client::new(mem0_url, key))),
        None => warn!("MEM0_API_KEY not set, conversation will not be remembered"),
    }

    let handle = orchestrator.handle();
    tokio::spawn(print_events(events_rx));

    // Detached: a thread parked on a terminal read must not hold up exit.
    let input = handle.clone();
    spawn_line_reader(std::io::stdin(), move |line| input.send_text(line)).context("spawning stdin reader")?;

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.stop().await;
        }
    });

    let report = orchestrator.run().await.context("assistant failed")?;
    if report.forced {
        warn!("Some tasks had to be aborted during shutdown");
    }
    Ok(())
}

/// Forward lines from `reader` to `send` on a plain OS thread, until EOF, a
/// read error, or `send` refusing a line.
fn spawn_line_reader<R, F>(reader: R, send: F) -> std::io::Result<JoinHandle<()>>
where
    R: std::io::Read + Send + 'static,
    F: Fn(String) -> bool + Send + 'static,
{
    thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in std::io::BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    if !send(line) {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    })
}

async fn print_events(mut events: mpsc::UnboundedReceiver<CoreEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Text(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            CoreEvent::EndOfTurn => println!(),
            CoreEvent::ToolInvoked { name, status } => println!("\n[{} -> {:?}]", name, status),
            CoreEvent::Activity(TurnActivity::FileListing { directory_path, files }) => {
                println!("\n[{}]", directory_path);
                for file in files {
                    println!("  {}", file);
                }
            }
            CoreEvent::Activity(TurnActivity::CodeExecution { code, result }) => {
                println!("\n--- code ---\n{}", code);
                if let Some(result) = result {
                    println!("--- result ---\n{}", result);
                }
            }
            CoreEvent::Activity(TurnActivity::Search(urls)) => {
                for url in urls {
                    println!("  source: {}", url);
                }
            }
            CoreEvent::Activity(TurnActivity::None) => {}
            CoreEvent::SpeakingStarted | CoreEvent::SpeakingStopped => {}
        }
    }
}
