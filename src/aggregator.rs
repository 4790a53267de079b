//! Per-turn processing of inbound session events.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::events::{CoreEvent, EventSink, TurnActivity};
use crate::gemini::{FunctionCall, Result, TurnEvent};
use crate::memory::{Role, Transcript};
use crate::queue::{Interrupt, Stamped, StreamItem, TtsItem};
use crate::session::{SessionSender, Turn};
use crate::tools::{ToolDispatcher, ToolStatus};

/// Whether a code-execution fragment is code the backend ran, as opposed to
/// the query text it used for a search.
///
/// Heuristic: anything containing `print(`, a newline or `import ` counts as
/// code. A one-line expression such as `2 ** 10` is classified as a query.
pub fn is_executed_code(fragment: &str) -> bool {
    fragment.contains("print(") || fragment.contains('\n') || fragment.contains("import ")
}

#[derive(Debug, Default)]
struct TurnState {
    seen_events: bool,
    urls: Vec<String>,
    code: Option<String>,
    code_result: Option<String>,
    file_listing: Option<(String, Vec<String>)>,
    assistant_text: String,
}

impl TurnState {
    fn add_urls(&mut self, urls: Vec<String>) {
        for url in urls {
            if !self.urls.contains(&url) {
                self.urls.push(url);
            }
        }
    }

    fn activity(&self) -> TurnActivity {
        if let Some((directory_path, files)) = &self.file_listing {
            TurnActivity::FileListing {
                directory_path: directory_path.clone(),
                files: files.clone(),
            }
        } else if let Some(code) = &self.code {
            TurnActivity::CodeExecution {
                code: code.clone(),
                result: self.code_result.clone(),
            }
        } else if !self.urls.is_empty() {
            TurnActivity::Search(self.urls.clone())
        } else {
            TurnActivity::None
        }
    }
}

/// Consumes inbound turns and routes their contents.
pub struct TurnAggregator {
    sender: SessionSender,
    tools: ToolDispatcher,
    tts: mpsc::UnboundedSender<TtsItem>,
    events: EventSink,
    interrupt: Interrupt,
    transcript: Transcript,
}

impl TurnAggregator {
    pub fn new(
        sender: SessionSender,
        tools: ToolDispatcher,
        tts: mpsc::UnboundedSender<TtsItem>,
        events: EventSink,
        interrupt: Interrupt,
        transcript: Transcript,
    ) -> Self {
        Self {
            sender,
            tools,
            tts,
            events,
            interrupt,
            transcript,
        }
    }

    /// Process one turn to its end and return its summary.
    ///
    /// The end-of-turn events and the TTS sentinel are published even when the
    /// turn is cut short by an error, so speech for the partial turn is still
    /// finalized; the error is returned afterwards.
    pub async fn process_turn(&mut self, turn: &mut Turn<'_>) -> Result<TurnActivity> {
        // Sampled on the turn's first event; this call parks while idle and
        // user text typed meanwhile bumps the epoch the reply belongs to.
        let mut epoch = None;
        let mut state = TurnState::default();
        let mut failure = None;

        while let Some(event) = turn.next().await {
            match event {
                Ok(event) => {
                    state.seen_events = true;
                    let epoch = *epoch.get_or_insert_with(|| self.interrupt.current());
                    self.handle_event(event, epoch, &mut state).await;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let activity = state.activity();
        if turn.is_complete() || state.seen_events {
            let epoch = epoch.unwrap_or_else(|| self.interrupt.current());
            self.finish_turn(epoch, &state, activity.clone());
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(activity),
        }
    }

    async fn handle_event(&mut self, event: TurnEvent, epoch: u64, state: &mut TurnState) {
        match event {
            TurnEvent::ToolCallRequest(calls) => self.handle_tool_calls(calls, state).await,
            TurnEvent::TextDelta(text) => {
                self.events.publish(CoreEvent::Text(text.clone()));
                state.assistant_text.push_str(&text);
                if self.tts.send(Stamped::new(epoch, StreamItem::Data(text))).is_err() {
                    warn!("TTS queue closed, text will not be spoken");
                }
            }
            TurnEvent::GroundingReference(urls) => state.add_urls(urls),
            TurnEvent::CodeExecution { code, result } => {
                if let Some(code) = code {
                    if is_executed_code(&code) {
                        debug!("Executed code:\n{}", code);
                        state.code = Some(code);
                    } else {
                        info!("Search query: {}", code);
                    }
                }
                if let Some(result) = result {
                    debug!("Code execution result: {}", result);
                    state.code_result = Some(result);
                }
            }
        }
    }

    /// Run every call of one chunk in order and answer them in one message.
    async fn handle_tool_calls(&mut self, calls: Vec<FunctionCall>, state: &mut TurnState) {
        let mut responses = Vec::with_capacity(calls.len());
        for call in &calls {
            let result = self.tools.dispatch(call);
            if call.name == "list_files" && result.status == ToolStatus::Success {
                if let (Some(directory_path), Some(files)) = (&result.directory_path, &result.files) {
                    state.file_listing = Some((directory_path.clone(), files.clone()));
                }
            }
            self.events.publish(CoreEvent::ToolInvoked {
                name: call.name.clone(),
                status: result.status,
            });
            responses.push(result.into_response(call));
        }

        if let Err(e) = self.sender.send_tool_response(responses).await {
            error!("Failed to send tool response: {}", e);
        }
    }

    fn finish_turn(&mut self, epoch: u64, state: &TurnState, activity: TurnActivity) {
        if !state.assistant_text.trim().is_empty() {
            self.transcript.record(Role::Assistant, state.assistant_text.clone());
        }
        self.events.publish(CoreEvent::Activity(activity));
        self.events.publish(CoreEvent::EndOfTurn);
        if self.tts.send(Stamped::new(epoch, StreamItem::EndOfStream)).is_err() {
            warn!("TTS queue closed, could not finalize utterance");
        }
    }
}
