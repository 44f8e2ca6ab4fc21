//! Session telemetry for the vitals agent.
//!
//! This module counts what happened during measurement sessions (windows
//! analysed, estimates accepted or rejected, sensor resets, dropped live
//! lines) so the effect of the drop-on-overflow and reset policies stays
//! observable.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_counters, create_shared_counters_with_persistence, CounterSnapshot,
    SessionCounters, SharedCounters,
};
