//! Sessions: data model, in-memory store, and export/import

pub mod interchange;
pub mod store;
pub mod types;

pub use interchange::SessionDocument;
pub use store::SessionStore;
pub use types::{
    AgencyDefinition, AgencyParticipant, AgencySeat, AgencySnapshot, EventType, LogLevel,
    LogPayload, PersonaSummary, Session, SessionEvent, SessionStatus, SessionTarget, TargetType,
    WorkflowInstance, WorkflowTask,
};
