//! sentineld: monitoring daemon for a background network agent.
//!
//! Watches the agent process and its connectivity on a fixed cadence,
//! classifies health, and drives breaker-protected automatic recovery.

pub mod collector;
pub mod control;
pub mod daemon;
pub mod health;
pub mod probes;
pub mod recovery;
pub mod report;
pub mod validator;
