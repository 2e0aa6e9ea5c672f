/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chat`: Submit one turn to a persona or an agency seat
- `sessions`: List, inspect, export, import and edit persisted sessions

Both build a [`SessionEngine`] from the loaded configuration and bootstrap it
from the local database before doing anything else.
*/

use std::sync::Arc;

use crate::config::Config;
use crate::engine::{EngineOptions, SessionEngine};
use crate::error::{Result, TurnstreamError};
use crate::persistence::PersistenceBridge;
use crate::session::SessionStore;
use crate::stream::transport::http::HttpTransport;

pub mod chat;
pub mod sessions;

/// Build an engine wired to the configured HTTP endpoint and database, and
/// load the persisted sessions into it.
pub async fn build_engine(config: &Config) -> Result<SessionEngine> {
    let base_url = url::Url::parse(&config.engine.base_url).map_err(|e| {
        TurnstreamError::Config(format!("Invalid engine URL {}: {}", config.engine.base_url, e))
    })?;
    let transport = HttpTransport::new(
        &base_url,
        &config.engine.stream_path,
        &config.engine.headers,
        config.engine.request_timeout(),
    )?;
    tracing::debug!("Engine endpoint: {}", transport.endpoint());

    let persistence = PersistenceBridge::open(
        config.storage.db_path.as_deref(),
        config.storage.bootstrap_event_limit,
    )?;

    let mut engine = SessionEngine::new(
        Arc::new(transport),
        Some(persistence),
        EngineOptions {
            idle_timeout: config.stream.idle_timeout(),
        },
    );
    let loaded = engine.bootstrap().await?;
    tracing::info!("Loaded {} session(s)", loaded);
    Ok(engine)
}

/// Resolve a full session id from an id or a unique prefix of one.
///
/// # Errors
///
/// Returns [`TurnstreamError::SessionNotFound`] when nothing matches, and
/// [`TurnstreamError::InvalidSubmission`] when the prefix is ambiguous.
pub fn resolve_session_id(store: &SessionStore, id_or_prefix: &str) -> Result<String> {
    let needle = id_or_prefix.trim();
    if store.contains(needle) {
        return Ok(needle.to_string());
    }
    if needle.is_empty() {
        return Err(TurnstreamError::SessionNotFound(id_or_prefix.to_string()).into());
    }

    let matches: Vec<&str> = store
        .list()
        .into_iter()
        .map(|session| session.id.as_str())
        .filter(|id| id.starts_with(needle))
        .collect();

    match matches.as_slice() {
        [] => Err(TurnstreamError::SessionNotFound(id_or_prefix.to_string()).into()),
        [id] => Ok(id.to_string()),
        _ => Err(TurnstreamError::InvalidSubmission(format!(
            "session prefix {} is ambiguous ({} matches)",
            needle,
            matches.len()
        ))
        .into()),
    }
}

/// First eight characters of an id, for tables.
pub(crate) fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}

/// Truncate `text` to `max` characters, marking the cut with `...`.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionTarget};
    use chrono::Utc;

    fn store_with(ids: &[&str]) -> SessionStore {
        let mut store = SessionStore::new();
        for id in ids {
            store.insert_session(Session::new(
                *id,
                "s",
                SessionTarget::persona("p1"),
                Utc::now(),
            ));
        }
        store
    }

    #[test]
    fn test_resolve_exact_and_prefix() {
        let store = store_with(&["abcdef01-1", "abcdef02-2", "ffff0000"]);
        assert_eq!(resolve_session_id(&store, "ffff0000").unwrap(), "ffff0000");
        assert_eq!(resolve_session_id(&store, "abcdef02").unwrap(), "abcdef02-2");
        assert_eq!(resolve_session_id(&store, " fff ").unwrap(), "ffff0000");
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() {
        let store = store_with(&["abcdef01-1", "abcdef02-2"]);
        let err = resolve_session_id(&store, "abcdef").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TurnstreamError>(),
            Some(TurnstreamError::InvalidSubmission(_))
        ));

        let err = resolve_session_id(&store, "zzz").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TurnstreamError>(),
            Some(TurnstreamError::SessionNotFound(_))
        ));
        assert!(resolve_session_id(&store, "").is_err());
    }

    #[test]
    fn test_short_id_and_truncate() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world, again", 10), "hello w...");
    }
}
