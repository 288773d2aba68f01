//! Async client for the UniFi Access controller's doorbell-facing surface.
//!
//! - **[`ControllerSession`]** -- cookie/CSRF web session: the two-phase
//!   login protocol, authenticated JSON `POST`s and the streaming topology
//!   fetch.
//! - **[`NotificationStream`]** -- the notification WebSocket running in
//!   its own task, handing doorbell frames to the caller through a
//!   single-slot [`Mailbox`](websocket::Mailbox), with caller-driven
//!   reconnect escalation.
//! - **[`ChunkedTransferDecoder`]** -- removes HTTP/1.1 chunked framing
//!   from a raw socket under bounded waits.
//! - **[`FieldFilter`]** -- whitelist-driven JSON extraction that skips
//!   everything it was not asked for while parsing.

pub mod chunked;
pub mod error;
pub mod events;
pub mod extract;
pub mod http;
pub mod session;
pub mod topology;
pub mod transport;
pub mod websocket;

pub use chunked::{ChunkedTransferDecoder, Termination};
pub use error::{AuthError, Error};
pub use events::DoorbellEvent;
pub use extract::{FieldFilter, FilterError};
pub use session::{ControllerSession, Credentials, Session};
pub use topology::{Reader, Topology};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    NotificationStream, ReconnectCounters, ReconnectPolicy, StreamState, StreamStatus,
    SuperviseAction,
};
