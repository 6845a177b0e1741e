//! Shared Server State
//!
//! Everything that sessions and workers share lives here:
//!
//! - `registry`: Sharded map from client id to live connection
//! - `stats`: Atomic connection and transfer counters
//! - `monitor`: Background task that periodically logs the counters
//!
//! ```text
//!   Session tasks ──┐                 ┌── Worker tasks
//!                   ▼                 ▼
//!          ┌──────────────────────────────────┐
//!          │ ClientRegistry   │     Stats     │
//!          └──────────────────────────────────┘
//!                                   ▲
//!                                   │ snapshot every 10s
//!                            ┌──────┴──────┐
//!                            │StatsMonitor │
//!                            └─────────────┘
//! ```

pub mod monitor;
pub mod registry;
pub mod stats;

// Re-export commonly used types
pub use monitor::{StatsMonitor, DEFAULT_MONITOR_INTERVAL};
pub use registry::{ClientHandle, ClientId, ClientRegistry, ClientStatus, FrameWriter, SendError};
pub use stats::{Stats, StatsSnapshot};
