//! xcvr agent: library half of the agent binary.
//!
//! Exposes the config, script runner and health monitor so the e2e tests
//! can drive them against a mock transceiver.

pub mod config;
pub mod monitor;
pub mod runner;
