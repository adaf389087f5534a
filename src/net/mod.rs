//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind)
//!     → connection.rs (task per connection, tracked per server instance)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Active → Draining → Closed (or aborted after the grace period)
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionSet};
pub use listener::{bind, ListenerError};
