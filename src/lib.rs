pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod ledger;
pub mod profile;
pub mod prompt;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transcript;

pub use config::Config;
pub use device::DeviceId;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use registry::DeviceSessionRegistry;
pub use session::{
    Session, SessionLifecycle, SessionReport, SessionSnapshot, SessionStatus, SignalOrCleanClose,
};
