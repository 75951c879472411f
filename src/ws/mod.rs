//! WebSocket transport configuration and errors.
//!
//! The socket itself is owned by the gateway session loop in
//! [`crate::gateway::connection`]; this module only holds what is generic to the
//! transport: timeouts, the reconnection backoff policy and transport error variants.

pub mod config;
pub mod error;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
