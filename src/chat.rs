// Session flow shared by the terminal chat and the web UI: append the user turn,
// ask the model, append the reply.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::constants;
use crate::llm_interaction::{CompletionClient, RemoteServiceError};
use crate::transcript::{Transcript, Turn};

/// State for one user session. The transcript is created on first use and lives
/// as long as the session does.
#[derive(Debug)]
pub struct ChatSession {
    system_prompt: String,
    transcript: Option<Transcript>,
}

impl ChatSession {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            transcript: None,
        }
    }

    pub fn transcript(&mut self) -> &mut Transcript {
        Transcript::initialize(&mut self.transcript, &self.system_prompt)
    }

    pub fn visible_turns(&mut self) -> Vec<Turn> {
        self.transcript().visible_turns().cloned().collect()
    }

    /// Records a submission as a user turn. Blank input is ignored and yields `None`.
    pub fn accept(&mut self, input: &str) -> Option<&Turn> {
        if input.trim().is_empty() {
            return None;
        }
        Some(self.transcript().push_user(input))
    }

    /// Sends the whole transcript to the model and appends its reply.
    ///
    /// On failure nothing is appended, so the last user turn stays unanswered.
    /// The error is returned to the caller and not retried.
    pub async fn answer(
        &mut self,
        client: &CompletionClient,
        model: &str,
    ) -> Result<String, RemoteServiceError> {
        let transcript = self.transcript();
        let reply = client.complete(transcript.full_turns(), model).await?;
        transcript.push_assistant(reply.clone());
        info!(turns = transcript.len(), "Exchange recorded");
        Ok(reply)
    }

    /// `accept` followed by `answer`. Blank input makes no remote call (`Ok(None)`).
    pub async fn submit(
        &mut self,
        client: &CompletionClient,
        model: &str,
        input: &str,
    ) -> Result<Option<String>, RemoteServiceError> {
        if self.accept(input).is_none() {
            return Ok(None);
        }
        self.answer(client, model).await.map(Some)
    }
}

/// Interactive chat over stdin/stdout for a single session. Ends on EOF or `/quit`.
pub async fn run_terminal_chat(
    client: &CompletionClient,
    model: &str,
    system_prompt: &str,
) -> Result<()> {
    let mut session = ChatSession::new(system_prompt);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    writeln!(
        stdout,
        "{} {} (/quit to exit)",
        constants::APP_TITLE,
        constants::APP_CAPTION
    )?;
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read from stdin")? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }

        match session.submit(client, model, &line).await {
            Ok(Some(reply)) => writeln!(stdout, "\n{}\n", reply)?,
            Ok(None) => {}
            Err(e) => {
                warn!(kind = ?e.kind, "Completion failed");
                let hint = e
                    .retry_after
                    .map(|d| format!(" (try again in {}s)", d.as_secs()))
                    .unwrap_or_default();
                eprintln!("error: {}{}", e, hint);
            }
        }
    }

    info!(turns = session.transcript().len(), "Chat session ended");
    Ok(())
}
