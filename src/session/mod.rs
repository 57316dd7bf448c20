//! Session orchestration.
//!
//! This module drives one device connection through its whole life:
//! - authorization (profile, quota, exclusivity, prompt)
//! - backend connect and frame relay
//! - the finalizing funnel that settles quota, progression, transcript
//!   and the registry slot exactly once, whatever ended the relay

mod lifecycle;
mod session;

pub use lifecycle::{
    CompletionPolicy, SessionLifecycle, SessionReport, SignalOrCleanClose,
};
pub use session::{Session, SessionSnapshot, SessionStatus};
