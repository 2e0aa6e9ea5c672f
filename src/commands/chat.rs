//! One-shot turn submission for the `chat` and `agency` commands
//!
//! The reply is printed as it streams: the text each turn gains goes to
//! stdout, and tool activity, progress, snapshots and errors go to stderr as
//! short dimmed notes. With `--no-stream` the turn is awaited and printed
//! whole.

use std::collections::HashMap;
use std::io::Write;

use colored::Colorize;

use crate::chunk::{Chunk, ChunkBody};
use crate::commands::{build_engine, resolve_session_id};
use crate::config::Config;
use crate::engine::{EngineUpdate, SessionEngine, Submission, SubmitTarget};
use crate::error::{Result, TurnstreamError};
use crate::session::{AgencyDefinition, AgencyParticipant, SessionEvent};
use crate::stream::request::ChatMessage;
use crate::turn::Timeline;

/// Arguments shared by `chat` and `agency`
#[derive(Debug, Clone)]
pub struct TurnArgs {
    pub target: SubmitTarget,
    pub message: String,
    /// Session id or prefix to continue
    pub session: Option<String>,
    pub name: Option<String>,
    /// Agency participants as `ROLE=PERSONA`
    pub participants: Vec<String>,
    pub no_stream: bool,
}

/// Submit one turn and print the reply.
pub async fn run_turn(config: Config, args: TurnArgs) -> Result<()> {
    let mut engine = build_engine(&config).await?;

    if let SubmitTarget::AgencySeat {
        agency_id, goal, ..
    } = &args.target
    {
        if !args.participants.is_empty() {
            let participants = parse_participants(&args.participants)?;
            engine.register_agency(AgencyDefinition {
                id: agency_id.clone(),
                name: agency_id.clone(),
                goal: goal.clone().unwrap_or_default(),
                workflow_id: None,
                participants,
            });
        }
    }

    let session_id = match &args.session {
        Some(raw) => Some(continue_session(&engine, raw)?),
        None => None,
    };

    let submission = Submission {
        session_id,
        display_name: args.name.clone(),
        target: args.target.clone(),
        messages: vec![ChatMessage::user(args.message.clone())],
        workflow_request: None,
    };

    let outcome = if args.no_stream {
        engine
            .complete(submission)
            .await
            .map(|response| println!("{}", response.content))
    } else {
        stream_turn(&mut engine, submission).await
    };

    engine.flush().await?;
    engine.shutdown();
    outcome
}

/// Resolve `--session`; an id that matches nothing starts a session with
/// exactly that id.
fn continue_session(engine: &SessionEngine, raw: &str) -> Result<String> {
    match resolve_session_id(engine.store(), raw) {
        Ok(id) => Ok(id),
        Err(e) => match e.downcast_ref::<TurnstreamError>() {
            Some(TurnstreamError::SessionNotFound(_)) => {
                tracing::debug!("No session matches {}, starting it fresh", raw);
                Ok(raw.trim().to_string())
            }
            _ => Err(e),
        },
    }
}

async fn stream_turn(engine: &mut SessionEngine, submission: Submission) -> Result<()> {
    let submitted = engine.submit(submission)?;
    tracing::info!("Streaming into session {}", submitted.session_id);

    let mut printer = ReplyPrinter::default();
    loop {
        let update = tokio::select! {
            update = engine.next_update() => update,
            _ = tokio::signal::ctrl_c() => {
                engine.cancel(&submitted.session_id);
                printer.finish();
                eprintln!("{}", "Cancelled".yellow());
                return Ok(());
            }
        };
        let Some(update) = update else {
            printer.finish();
            return Err(TurnstreamError::Transport("stream ended without closing".to_string()).into());
        };
        if update.ticket() != &submitted.ticket {
            continue;
        }
        match update {
            EngineUpdate::Chunk { chunk, event, .. } => printer.print(&event, &chunk),
            EngineUpdate::StreamClosed { .. } => {
                printer.finish();
                eprintln!("{} {}", "session".dimmed(), submitted.session_id.cyan());
                return Ok(());
            }
            EngineUpdate::StreamFailed { message, .. } => {
                printer.finish();
                return Err(TurnstreamError::Transport(message).into());
            }
        }
    }
}

/// Prints one streamed reply as its turns fold.
///
/// Each stream id is folded on its own; whatever text a turn gains is
/// printed as it arrives.
#[derive(Debug, Default)]
struct ReplyPrinter {
    timeline: Timeline,
    printed: HashMap<String, usize>,
    wrote_text: bool,
    at_line_start: bool,
}

impl ReplyPrinter {
    fn print(&mut self, event: &SessionEvent, chunk: &Chunk) {
        if let Some(text) = self.absorb(event, chunk) {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "{}", text);
            let _ = stdout.flush();
            self.wrote_text = true;
            self.at_line_start = text.ends_with('\n');
            return;
        }
        if let Some(note) = describe_chunk(chunk) {
            if self.wrote_text && !self.at_line_start {
                println!();
                self.at_line_start = true;
            }
            eprintln!("{}", note.dimmed());
        }
    }

    /// Fold `chunk` and return the text its turn gained, if any.
    fn absorb(&mut self, event: &SessionEvent, chunk: &Chunk) -> Option<String> {
        self.timeline.apply_chunk(event, chunk);
        let stream_id = chunk.stream_id.as_deref()?;
        let turn = self.timeline.turn(stream_id)?;
        let printed = self.printed.entry(stream_id.to_string()).or_default();
        let growth = turn.text.get(*printed..).filter(|text| !text.is_empty())?;
        let growth = growth.to_string();
        *printed = turn.text.len();
        Some(growth)
    }

    fn finish(&mut self) {
        if self.wrote_text && !self.at_line_start {
            println!();
            self.at_line_start = true;
        }
    }
}

/// One-line note for chunks that are not reply text.
fn describe_chunk(chunk: &Chunk) -> Option<String> {
    match &chunk.body {
        ChunkBody::TextDelta { .. } | ChunkBody::FinalResponse { .. } | ChunkBody::FinalMarker => {
            None
        }
        ChunkBody::ToolCallRequest { tool_calls } => {
            let names: Vec<&str> = tool_calls.iter().map(|call| call.name.as_str()).collect();
            Some(format!("-> calling {}", names.join(", ")))
        }
        ChunkBody::ToolResultEmission {
            tool_name,
            is_success,
            error_message,
            ..
        } => Some(match (is_success, error_message) {
            (true, _) => format!("<- {} ok", tool_name),
            (false, Some(message)) => format!("<- {} failed: {}", tool_name, message),
            (false, None) => format!("<- {} failed", tool_name),
        }),
        ChunkBody::SystemProgress {
            message,
            progress_percentage,
        } => Some(match progress_percentage {
            Some(pct) => format!("... {} ({:.0}%)", message, pct),
            None => format!("... {}", message),
        }),
        ChunkBody::Error { code, message, .. } => Some(match code {
            Some(code) => format!("error [{}]: {}", code, message),
            None => format!("error: {}", message),
        }),
        ChunkBody::AgencyUpdate { agency } => {
            let seats: Vec<String> = agency
                .seats
                .iter()
                .map(|seat| format!("{}={}", seat.role_id, seat.status))
                .collect();
            Some(format!("agency {}: {}", agency.agency_id, seats.join(" ")))
        }
        ChunkBody::WorkflowUpdate { workflow } => Some(format!(
            "workflow {}: {} ({} task(s))",
            workflow.workflow_id,
            workflow.status,
            workflow.tasks.len()
        )),
    }
}

fn parse_participants(raw: &[String]) -> Result<Vec<AgencyParticipant>> {
    raw.iter()
        .map(|entry| {
            let (role_id, persona_id) = entry
                .split_once('=')
                .map(|(role, persona)| (role.trim(), persona.trim()))
                .filter(|(role, persona)| !role.is_empty() && !persona.is_empty())
                .ok_or_else(|| {
                    TurnstreamError::InvalidSubmission(format!(
                        "participant must be ROLE=PERSONA, got {}",
                        entry
                    ))
                })?;
            Ok(AgencyParticipant {
                role_id: role_id.to_string(),
                persona_id: persona_id.to_string(),
            })
        })
        .collect()
}
