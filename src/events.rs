use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::tools::ToolStatus;

/// End-of-turn summary of what the assistant did besides talking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnActivity {
    /// A successful `list_files` call ran during the turn.
    FileListing { directory_path: String, files: Vec<String> },
    CodeExecution { code: String, result: Option<String> },
    /// Grounding URLs cited by the turn, first-seen order.
    Search(Vec<String>),
    None,
}

/// Events published from the core to whatever presents the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Assistant text, emitted as soon as it arrives.
    Text(String),
    ToolInvoked { name: String, status: ToolStatus },
    Activity(TurnActivity),
    EndOfTurn,
    SpeakingStarted,
    SpeakingStopped,
}

/// Sending half of the presentation channel.
///
/// Publishing never fails; once the presentation side is gone events are
/// simply dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<CoreEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<CoreEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink with no listener.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: CoreEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Presentation channel closed, dropping event");
            }
        }
    }
}
