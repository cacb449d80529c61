//! Ordered conversation history for one chat session.
//!
//! A [`Transcript`] always starts with exactly one system [`Turn`]. That turn is
//! sent to the model with every request but is never shown to the user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation. Fields are private so a turn cannot change
/// after it has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("a transcript holds exactly one system turn; it cannot be appended")]
    SystemTurn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Creates a transcript seeded with the given system instruction.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::new(Role::System, system_prompt)],
        }
    }

    /// Returns the session's transcript, creating it only if the slot is empty.
    /// Existing history is left untouched.
    pub fn initialize<'a>(
        slot: &'a mut Option<Transcript>,
        system_prompt: &str,
    ) -> &'a mut Transcript {
        slot.get_or_insert_with(|| Transcript::new(system_prompt))
    }

    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<&Turn, TranscriptError> {
        if role == Role::System {
            return Err(TranscriptError::SystemTurn);
        }
        self.turns.push(Turn::new(role, content));
        Ok(self.last())
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &Turn {
        self.turns.push(Turn::new(Role::User, content));
        self.last()
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &Turn {
        self.turns.push(Turn::new(Role::Assistant, content));
        self.last()
    }

    /// Turns meant for display, in conversation order. The system turn is skipped.
    pub fn visible_turns(&self) -> impl Iterator<Item = &Turn> + '_ {
        self.turns.iter().filter(|turn| turn.role != Role::System)
    }

    /// Every turn including the system instruction; this is the request payload.
    pub fn full_turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn system_prompt(&self) -> &str {
        // The seed turn is installed by `new` and never removed.
        &self.turns[0].content
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn last(&self) -> &Turn {
        // Never empty: the system turn is always present.
        &self.turns[self.turns.len() - 1]
    }
}
