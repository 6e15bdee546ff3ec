//! Wire protocol for VeilChat.
//!
//! Two layers travel over the relay WebSocket:
//!
//! - [`RelayMessage`]: JSON text frames discriminated by `type`
//! - [`Packet`]: the encrypted envelope, carried inside `send`/`deliver`
//!   as an opaque JSON string
//!
//! ```text
//! {"type":"send","to":"bob","packet":"{\"packet_id\":…}","ts":"…"}
//! ```

mod packet;
mod types;

pub use packet::{peek_packet_id, Packet};
pub use types::{MessageStatus, RelayMessage, RosterEntry};

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8765;
