//! Device session management.
//!
//! One client session per registered device, supervised by
//! [`SessionManager`]. The registry, pairing transitions, event routing,
//! and teardown plumbing live in the submodules.

mod cleanup;
mod error;
mod machine;
mod manager;
mod router;
mod store;
mod terminate;

pub use cleanup::{cleanup_session_dir, session_dir, CleanupError};
pub use error::{Result, SessionError};
pub use machine::{PairingMachine, PumpControl};
pub use manager::{SendReceipt, SessionManager};
pub use router::{rule_matches, EventRouter, WebhookEnvelope};
pub use store::{DeviceSession, SessionStore};
pub use terminate::{NoopTerminator, OsTerminator, ProcessTerminator};
