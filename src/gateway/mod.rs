//! The gateway session protocol.
//!
//! Frames are decoded by [`payload`], dispatches resolved through the table in
//! [`dispatch`], and the whole lifecycle (handshake, heartbeats, reconnection by
//! close code) is driven by [`SessionManager`] on top of the pure
//! [`SessionState`] machine.

pub mod close_code;
pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod opcode;
pub mod payload;
pub mod session;

pub use close_code::{CloseCode, PostCloseAction, action_for};
pub use connection::{DispatchReceiver, SessionManager};
pub use dispatch::Dispatch;
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use opcode::OpCode;
pub use payload::{DecodeError, Payload, decode, encode};
pub use session::{Handshake, SessionState, Status};
