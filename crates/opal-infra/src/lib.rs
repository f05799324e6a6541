//! Ambient cross-cutting concerns shared by every OPAL media plane crate:
//! logging setup, error-context helpers, the tunables config, and the
//! lifecycle trait used by Connection, RTP Session and Patch.

pub mod action;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logging;

pub use action::PacketAction;
pub use config::MediaPlaneConfig;
pub use errors::{ErrorContext, ErrorExt};
pub use lifecycle::{Lifecycle, LifecycleState};
