//! # Utility Modules
//!
//! Supporting pieces shared by the engine and the network layer.
//!
//! ## Components
//! - **Listeners**: callback registry with panic isolation
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: thread-safe observability counters and timers

pub mod listeners;
pub mod logging;
pub mod metrics;

pub use listeners::{ListenerId, ListenerRegistry};
pub use metrics::{Metrics, MetricsSnapshot};
