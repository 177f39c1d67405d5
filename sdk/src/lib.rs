//! Parley SDK
//!
//! Shared vocabulary for the Parley gateway and its tooling: the
//! conversation data model (turns, retrieved passages, turn results) and
//! the gateway error taxonomy. The gateway crate and any future core tools
//! depend on these types instead of redefining their own.

pub mod errors;
pub mod types;

pub use errors::{GatewayError, ParleyErrorExt};
pub use types::{
    AudioFormat, BackendKind, RetrievedPassage, Role, SourceRef, Stage, Turn, TurnInput,
    TurnResult,
};
