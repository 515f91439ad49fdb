//! Pausable encounter lifecycle for consultation recording.
//!
//! [`EncounterManager`] drives start, pause, resume and complete against any
//! [`EncounterBackend`]; [`HttpBackend`] is the networked implementation.
//! The [`duration`] helpers reconcile recording length for every display path.

pub mod backend;
pub mod config;
pub mod duration;
pub mod encounter;
pub mod http_backend;
pub mod manager;
pub mod report;

pub use backend::{BackendError, EncounterBackend};
pub use config::Config;
pub use duration::{compute_duration_seconds, format_duration, TimeInput, UNKNOWN_DURATION};
pub use encounter::{
    Encounter, EncounterMessage, EncounterState, EncounterStatus, MessageRole, NewMessage,
    StateValidationError,
};
pub use http_backend::{HttpBackend, OWNER_HEADER};
pub use manager::{
    EncounterManager, LifecycleError, LifecyclePhase, ManagerStatus, SharedEncounterManager,
};
pub use report::ReportDraft;
