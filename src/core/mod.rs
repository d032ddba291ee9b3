//! Core kill switch functionality
//!
//! This module contains the core types and logic for driving the host packet
//! filter. It provides:
//!
//! - [`registry`]: Chain names, families and rule priorities
//! - [`command`]: Backend independent firewall commands
//! - [`backend`]: Rendering commands for `firewall-cmd --direct` or `iptables`
//! - [`executor`]: Running command batches and handling failures
//! - [`killswitch`]: The kill switch operations as ordered command plans
//! - [`error`]: Error types for firewall operations

pub mod backend;
pub mod command;
pub mod error;
pub mod executor;
pub mod killswitch;
pub mod registry;

#[cfg(test)]
pub mod test_helpers;
