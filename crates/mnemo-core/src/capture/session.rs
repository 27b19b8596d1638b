//! Ephemeral per-conversation state.

/// Transcript accumulated for a session, consumed once by the distiller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptBuffer {
    turns: Vec<String>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: impl Into<String>) {
        self.turns.push(turn.into());
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Take the whole transcript, leaving the buffer empty.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.turns).join("\n")
    }
}

/// Usage and transcript of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub usage_count: u64,
    pub capacity: u64,
    /// Mirror of the monitor's durable flag for this session.
    pub threshold_crossed: bool,
    pub transcript: TranscriptBuffer,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn record_usage(&mut self, usage_count: u64, capacity: u64) {
        self.usage_count = usage_count;
        self.capacity = capacity;
    }
}
