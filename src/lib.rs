//! DRKS - Dumb Rust Kill Switch
//!
//! A VPN kill switch for Linux: once armed, the host can only talk over the
//! VPN interface and a handful of explicitly opened exceptions. Rules are
//! managed through firewalld's direct interface or plain iptables chains.
//!
//! # Architecture
//!
//! - [`core`] - Chain registry, typed commands, backend rendering and the kill switch operations
//! - [`audit`] - Audit logging for every firewall changing operation
//! - [`validators`] - Input validation for targets, ports and interfaces
//! - [`config`] - Configuration persistence
//! - [`lock`] - Exclusive lock around a running operation
//! - [`elevation`] - Running backend commands with root privileges
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Safety Features
//!
//! - Arguments reach the backend as argv entries, never through a shell
//! - `on()` and `open_by_ip()` reset before adding, so repeats never pile up rules
//! - Default-deny is installed after every exception of its chain
//! - Concurrent invocations are rejected instead of interleaved

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod lock;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::backend::Backend;
pub use core::error::{Error, Result};
pub use core::executor::{DryRunExecutor, ExecutionReport, Executor, FailurePolicy, SystemExecutor};
pub use core::killswitch::{KillSwitch, KillSwitchSettings};
