//! Command-line interface definition for Turnstream
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for persona chat, agency seats, and session management.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Turnstream - streaming session client for agent orchestration engines
///
/// Submit turns to personas or agency seats, watch the streamed response
/// as it folds, and manage the locally persisted session history.
#[derive(Parser, Debug, Clone)]
#[command(name = "turnstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the engine base URL from config
    #[arg(long)]
    pub engine_url: Option<String>,

    /// Override the session database path
    #[arg(long = "db", value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Turnstream
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send one message to a persona and stream the reply
    Chat {
        /// Persona to talk to
        #[arg(short, long)]
        persona: String,

        /// Message text
        message: String,

        /// Continue an existing session (full id or unique prefix)
        #[arg(short, long)]
        session: Option<String>,

        /// Name for a new session
        #[arg(short, long)]
        name: Option<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Send one message to a seat of an agency and stream the reply
    Agency {
        /// Agency id
        #[arg(short, long)]
        agency: String,

        /// Seat (role) id within the agency
        #[arg(long)]
        seat: String,

        /// Message text
        message: String,

        /// Continue an existing session (full id or unique prefix)
        #[arg(short, long)]
        session: Option<String>,

        /// Agency goal sent with the request
        #[arg(short, long)]
        goal: Option<String>,

        /// Agency participant as ROLE=PERSONA; repeat for each seat
        #[arg(long = "participant", value_name = "ROLE=PERSONA")]
        participants: Vec<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Manage persisted sessions
    Sessions {
        /// Session subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions, most recently updated first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a session's timeline and telemetry
    Show {
        /// Session id or unique prefix
        id: String,

        /// Print the timeline as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a session as JSON
    Export {
        /// Session id or unique prefix
        id: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a session from an exported JSON file
    Import {
        /// File produced by `sessions export`
        file: PathBuf,
    },

    /// Rename a session
    Rename {
        /// Session id or unique prefix
        id: String,

        /// New display name
        name: String,
    },

    /// Remove every event of a session but keep the session
    Clear {
        /// Session id or unique prefix
        id: String,
    },

    /// Delete a session and its events
    Delete {
        /// Session id or unique prefix
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            engine_url: None,
            db_path: None,
            command: Commands::Sessions {
                command: SessionCommand::List { json: false },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Sessions {
                command: SessionCommand::List { json: false }
            }
        ));
    }

    #[test]
    fn test_cli_parse_chat_command() {
        let cli = Cli::try_parse_from(["turnstream", "chat", "--persona", "p1", "hello"]).unwrap();
        if let Commands::Chat {
            persona,
            message,
            session,
            name,
            no_stream,
        } = cli.command
        {
            assert_eq!(persona, "p1");
            assert_eq!(message, "hello");
            assert_eq!(session, None);
            assert_eq!(name, None);
            assert!(!no_stream);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_chat_requires_persona() {
        assert!(Cli::try_parse_from(["turnstream", "chat", "hello"]).is_err());
    }

    #[test]
    fn test_cli_parse_agency_with_participants() {
        let cli = Cli::try_parse_from([
            "turnstream",
            "agency",
            "--agency",
            "ag1",
            "--seat",
            "writer",
            "--participant",
            "writer=p1",
            "--participant",
            "editor=p2",
            "--no-stream",
            "draft it",
        ])
        .unwrap();
        if let Commands::Agency {
            agency,
            seat,
            message,
            participants,
            no_stream,
            ..
        } = cli.command
        {
            assert_eq!(agency, "ag1");
            assert_eq!(seat, "writer");
            assert_eq!(message, "draft it");
            assert_eq!(participants, vec!["writer=p1", "editor=p2"]);
            assert!(no_stream);
        } else {
            panic!("Expected Agency command");
        }
    }

    #[test]
    fn test_cli_parse_sessions_rename() {
        let cli =
            Cli::try_parse_from(["turnstream", "sessions", "rename", "abc123", "New name"]).unwrap();
        if let Commands::Sessions {
            command: SessionCommand::Rename { id, name },
        } = cli.command
        {
            assert_eq!(id, "abc123");
            assert_eq!(name, "New name");
        } else {
            panic!("Expected Sessions Rename command");
        }
    }

    #[test]
    fn test_cli_parse_global_overrides() {
        let cli = Cli::try_parse_from([
            "turnstream",
            "--db",
            "/tmp/s.db",
            "--engine-url",
            "http://engine:1",
            "-v",
            "sessions",
            "list",
        ])
        .unwrap();
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/s.db")));
        assert_eq!(cli.engine_url.as_deref(), Some("http://engine:1"));
        assert!(cli.verbose);
    }
}
