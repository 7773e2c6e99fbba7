//! Admin conversation state, kept per chat in memory.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

/// How long the broadcast prompt waits for the message text
pub const BROADCAST_PROMPT_TTL_SECS: i64 = 20;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminDialogueState {
    #[default]
    Idle,
    /// The next text message from the admin is broadcast to every user
    AwaitingBroadcast { started_at: NaiveDateTime },
    /// The next document from the admin goes into the knowledge base
    AwaitingKnowledgeFile,
}

pub type AdminDialogue = Dialogue<AdminDialogueState, InMemStorage<AdminDialogueState>>;

impl AdminDialogueState {
    pub fn broadcast(now: NaiveDateTime) -> Self {
        AdminDialogueState::AwaitingBroadcast { started_at: now }
    }

    /// Whether a broadcast prompt opened at `started_at` is still valid
    pub fn broadcast_is_live(started_at: NaiveDateTime, now: NaiveDateTime) -> bool {
        now - started_at <= Duration::seconds(BROADCAST_PROMPT_TTL_SECS)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, AdminDialogueState::Idle)
    }
}
