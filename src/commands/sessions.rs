//! Session management commands
//!
//! Every subcommand works on the local database only; no stream is opened.

use std::path::Path;

use colored::Colorize;
use prettytable::{format, Table};
use serde_json::{json, Value};

use crate::cli::SessionCommand;
use crate::commands::{build_engine, resolve_session_id, short_id, truncate};
use crate::config::Config;
use crate::engine::SessionEngine;
use crate::error::Result;
use crate::session::{EventType, LogLevel, Session, SessionEvent, SessionStatus};
use crate::turn::{Timeline, TimelineEntry, Turn};

/// Handle session commands
pub async fn handle_sessions(config: Config, command: SessionCommand) -> Result<()> {
    let mut engine = build_engine(&config).await?;

    match command {
        SessionCommand::List { json } => list_sessions(&engine, json)?,
        SessionCommand::Show { id, json } => {
            let id = resolve_session_id(engine.store(), &id)?;
            show_session(&engine, &id, json).await?;
        }
        SessionCommand::Export { id, output } => {
            let id = resolve_session_id(engine.store(), &id)?;
            let document = engine.export_session(&id)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)?;
                    eprintln!(
                        "{}",
                        format!("Exported session {} to {}", id, path.display()).green()
                    );
                }
                None => println!("{}", document),
            }
        }
        SessionCommand::Import { file } => import_session(&mut engine, &file)?,
        SessionCommand::Rename { id, name } => {
            let id = resolve_session_id(engine.store(), &id)?;
            let session = engine.rename_session(&id, &name)?;
            println!(
                "{}",
                format!("Renamed session {} to {}", short_id(&id), session.display_name).green()
            );
        }
        SessionCommand::Clear { id } => {
            let id = resolve_session_id(engine.store(), &id)?;
            engine.clear_session(&id)?;
            println!("{}", format!("Cleared history of session {}", short_id(&id)).green());
        }
        SessionCommand::Delete { id } => {
            let id = resolve_session_id(engine.store(), &id)?;
            engine.delete_session(&id)?;
            println!("{}", format!("Deleted session {}", id).green());
        }
    }

    engine.flush().await?;
    engine.shutdown();
    Ok(())
}

fn list_sessions(engine: &SessionEngine, as_json: bool) -> Result<()> {
    let sessions = engine.store().list();

    if as_json {
        let rows: Vec<Value> = sessions.iter().map(|session| session_summary(session)).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Target".bold(),
        "Status".bold(),
        "Events".bold(),
        "Last Updated".bold()
    ]);

    for session in sessions {
        table.add_row(prettytable::row![
            short_id(&session.id).cyan(),
            truncate(&session.display_name, 40),
            format!(
                "{}:{}",
                session.target.target_type().as_str(),
                session.target.target_ref()
            ),
            status_label(session.status),
            session.events.len(),
            session.updated_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }

    println!("\nSessions:");
    table.printstd();
    println!();
    println!(
        "Use {} to inspect a session.",
        "turnstream sessions show <ID>".cyan()
    );
    println!();
    Ok(())
}

async fn show_session(engine: &SessionEngine, id: &str, as_json: bool) -> Result<()> {
    let Some(session) = engine.store().get(id) else {
        return Ok(());
    };
    let timeline = Timeline::from_events(&session.events);

    if as_json {
        let mut summary = session_summary(session);
        summary["timeline"] = timeline_json(&timeline);
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== Session {} ===", session.id);
    println!("Name:    {}", session.display_name);
    println!(
        "Target:  {} {}",
        session.target.target_type().as_str(),
        session.target.target_ref()
    );
    println!("Status:  {}", status_label(session.status));
    println!("Created: {}", session.created_at.to_rfc3339());
    println!("Updated: {}", session.updated_at.to_rfc3339());

    if let Some(persistence) = engine.persistence() {
        if let Some(telemetry) = persistence.telemetry(id).await? {
            println!(
                "Chunks:  {} ({} error(s), last stream {})",
                telemetry.chunk_count,
                telemetry.error_count,
                telemetry.last_stream_id.as_deref().unwrap_or("-")
            );
        }
    }
    println!();

    if timeline.is_empty() {
        println!("{}", "(no events)".dimmed());
        return Ok(());
    }
    for line in render_timeline(&timeline) {
        println!("{}", line);
    }
    Ok(())
}

fn import_session(engine: &mut SessionEngine, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)?;
    let session = engine.import_session(&contents)?;
    println!(
        "{}",
        format!(
            "Imported session {} ({} event(s))",
            session.id,
            session.events.len()
        )
        .green()
    );
    Ok(())
}

fn session_summary(session: &Session) -> Value {
    json!({
        "id": session.id,
        "displayName": session.display_name,
        "targetType": session.target.target_type().as_str(),
        "targetRef": session.target.target_ref(),
        "status": session.status.as_str(),
        "createdAt": session.created_at,
        "updatedAt": session.updated_at,
        "eventCount": session.events.len(),
    })
}

fn status_label(status: SessionStatus) -> String {
    match status {
        SessionStatus::Idle => status.as_str().green().to_string(),
        SessionStatus::Streaming => status.as_str().cyan().to_string(),
        SessionStatus::Error => status.as_str().red().to_string(),
    }
}

/// Plain-text lines for a timeline, oldest entry first.
fn render_timeline(timeline: &Timeline) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in timeline.entries() {
        match entry {
            TimelineEntry::Turn(turn) => render_turn(turn, &mut lines),
            TimelineEntry::Event(event) => lines.push(render_event(event)),
        }
    }
    lines
}

fn render_turn(turn: &Turn, lines: &mut Vec<String>) {
    let who = turn.persona_id.as_deref().unwrap_or("assistant");
    let state = if turn.is_final { "" } else { " (partial)" };
    lines.push(format!(
        "[{}] {}{} [{}]",
        turn.created_at.format("%H:%M:%S"),
        who,
        state,
        short_id(&turn.stream_id)
    ));
    if !turn.text.is_empty() {
        for text_line in turn.text.lines() {
            lines.push(format!("    {}", text_line));
        }
    }
    for log in &turn.logs {
        lines.push(format!("    {}", log));
    }
    if let Some(progress) = turn.latest_progress() {
        lines.push(format!("    progress: {}", progress.message));
    }
}

fn render_event(event: &SessionEvent) -> String {
    let at = event.timestamp.format("%H:%M:%S");
    match event.kind {
        EventType::Log => {
            let log = event.log();
            let level = match log.as_ref().and_then(|log| log.level) {
                Some(LogLevel::Error) => "error",
                Some(LogLevel::Warn) => "warn",
                Some(LogLevel::Info) | None => "info",
            };
            let message = log.map(|log| log.message).unwrap_or_default();
            format!("[{}] log {}: {}", at, level, message)
        }
        EventType::Chunk(kind) => {
            let detail = match &event.payload {
                Value::Object(map) => map
                    .get("message")
                    .or_else(|| map.get("agencyId"))
                    .or_else(|| map.get("workflowId"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            match detail {
                Some(detail) => format!("[{}] {} {}", at, kind.as_str(), detail),
                None => format!("[{}] {}", at, kind.as_str()),
            }
        }
    }
}

fn timeline_json(timeline: &Timeline) -> Value {
    let entries: Vec<Value> = timeline
        .entries()
        .iter()
        .map(|entry| match entry {
            TimelineEntry::Turn(turn) => json!({ "kind": "turn", "turn": turn }),
            TimelineEntry::Event(event) => json!({ "kind": "event", "event": event }),
        })
        .collect();
    Value::Array(entries)
}
