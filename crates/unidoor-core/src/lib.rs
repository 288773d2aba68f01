//! Doorbell bridge logic on top of `unidoor-api`.
//!
//! - **[`ControllerClient`]**: Facade over one access controller: login
//!   and device-id bootstrap, ring / dismiss requests, topology fetch with
//!   retry, notification stream supervision and active call tracking.
//!
//! - **[`Supervisor`]**: The cooperative control loop. Owns the client,
//!   ticks it every few milliseconds, retries login, escalates a flapping
//!   stream into a re-login and serves requests from a [`SupervisorHandle`].
//!
//! - **[`ActiveCallTracker`]**: Single-slot call state: ring overwrites,
//!   matching end clears, stale calls expire.
//!
//! Observers follow [`DoorbellUpdate`]s over a broadcast channel and read
//! [`ControllerStatus`] snapshots from a watch channel.

pub mod call;
pub mod config;
pub mod controller;
pub mod device_ids;
pub mod error;
pub mod requests;
pub mod status;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use call::{ActiveCall, ActiveCallTracker, CallSummary};
pub use config::{ControllerConfig, DoorbellConfig, TimingConfig, TlsVerification};
pub use controller::ControllerClient;
pub use device_ids::DeviceIds;
pub use error::CoreError;
pub use status::{ControllerStatus, DoorbellUpdate, IdleReason};
pub use supervisor::{Request, Supervisor, SupervisorHandle};

pub use unidoor_api::{Reader, StreamState, SuperviseAction, Topology};
