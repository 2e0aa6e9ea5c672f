//! Concurrency guard
//!
//! Decides whether a submission may open a stream. A persona session has a
//! single slot: `idle --acquire--> streaming --release--> idle`. An agency
//! has one independent slot per seat, so seats stream in parallel and only
//! the seat being (re)started is checked.
//!
//! Every successful acquire issues a fresh ticket. Releasing with a ticket
//! that no longer holds the slot is a no-op, so a late release from a
//! replaced stream can never free its successor's slot.

use std::collections::HashMap;

use crate::error::TurnstreamError;

/// Identity of a concurrency slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    /// The only slot of a persona session
    Persona { session_id: String },
    /// One seat of an agency
    Seat { agency_id: String, seat_id: String },
}

impl SlotKey {
    pub fn persona(session_id: impl Into<String>) -> Self {
        SlotKey::Persona {
            session_id: session_id.into(),
        }
    }

    pub fn seat(agency_id: impl Into<String>, seat_id: impl Into<String>) -> Self {
        SlotKey::Seat {
            agency_id: agency_id.into(),
            seat_id: seat_id.into(),
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKey::Persona { session_id } => write!(f, "persona session {}", session_id),
            SlotKey::Seat { agency_id, seat_id } => {
                write!(f, "agency {} seat {}", agency_id, seat_id)
            }
        }
    }
}

/// Proof of holding a slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotTicket {
    pub key: SlotKey,
    pub id: u64,
}

/// Slot registry
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    held: HashMap<SlotKey, u64>,
    next_id: u64,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or fail with [`TurnstreamError::AlreadyStreaming`].
    ///
    /// # Examples
    ///
    /// ```
    /// use turnstream::stream::guard::{ConcurrencyGuard, SlotKey};
    ///
    /// let mut guard = ConcurrencyGuard::new();
    /// let ticket = guard.acquire(SlotKey::persona("s1")).unwrap();
    /// assert!(guard.acquire(SlotKey::persona("s1")).is_err());
    /// guard.release(&ticket);
    /// assert!(guard.acquire(SlotKey::persona("s1")).is_ok());
    /// ```
    pub fn acquire(&mut self, key: SlotKey) -> Result<SlotTicket, TurnstreamError> {
        if self.held.contains_key(&key) {
            return Err(TurnstreamError::AlreadyStreaming {
                slot: key.to_string(),
            });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.held.insert(key.clone(), id);
        Ok(SlotTicket { key, id })
    }

    /// Free the slot if `ticket` still holds it. Returns whether it did.
    pub fn release(&mut self, ticket: &SlotTicket) -> bool {
        match self.held.get(&ticket.key) {
            Some(holder) if *holder == ticket.id => {
                self.held.remove(&ticket.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_held(&self, key: &SlotKey) -> bool {
        self.held.contains_key(key)
    }

    /// Ticket id currently holding `key`.
    pub fn holder(&self, key: &SlotKey) -> Option<u64> {
        self.held.get(key).copied()
    }

    /// Number of seats of `agency_id` currently streaming.
    pub fn active_seats(&self, agency_id: &str) -> usize {
        self.held
            .keys()
            .filter(|key| matches!(key, SlotKey::Seat { agency_id: a, .. } if a == agency_id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
