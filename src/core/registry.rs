//! Owned chains, link topology and rule priorities
//!
//! Everything the kill switch creates lives in this namespace. Callers look
//! chains up by role ([`ChainRole`]) or hook ([`Builtin`]) and never spell a
//! chain name themselves, so nothing outside the `drks_` prefix can be
//! flushed or deleted by accident.

use serde::{Deserialize, Serialize};

/// Table holding all chains (firewalld direct interface)
pub const FILTER_TABLE: &str = "filter";

/// Rule priorities for the firewalld direct interface.
///
/// Lower values are evaluated first. iptables has no explicit priority and
/// relies on append order instead.
pub mod priority {
    pub const HIGHEST: i32 = 0;
    pub const TEMP: i32 = 10;
    pub const HIGH: i32 = 100;
    /// Per-IP exceptions opened by `open_by_ip`
    pub const CONNECTION: i32 = 199;
    pub const MEDIUM: i32 = 200;
    pub const LOW: i32 = 300;
    /// Links and base accept rules
    pub const KILLSWITCH: i32 = 999;
    /// Default-deny, always last
    pub const LOWEST: i32 = 1000;
}

/// IP address family of a chain
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Family {
    #[strum(serialize = "ipv4")]
    V4,
    #[strum(serialize = "ipv6")]
    V6,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    /// Argument used by `firewall-cmd --direct`
    pub const fn as_str(self) -> &'static str {
        match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }
}

/// Logical role of an owned chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainRole {
    /// Evaluated for every inbound packet once armed
    Inbound,
    /// Evaluated for every outbound packet once armed
    Outbound,
    /// Transient exceptions opened by IP or domain
    Connection,
}

impl ChainRole {
    /// Creation order used by setup and teardown
    pub const ALL: [ChainRole; 3] = [ChainRole::Inbound, ChainRole::Outbound, ChainRole::Connection];

    pub const fn chain_name(self) -> &'static str {
        match self {
            ChainRole::Inbound => "drks_inbound",
            ChainRole::Outbound => "drks_outbound",
            ChainRole::Connection => "drks_conn",
        }
    }
}

/// Shared built-in chains the kill switch hooks into but never flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Input,
    Output,
}

impl Builtin {
    pub const fn chain_name(self) -> &'static str {
        match self {
            Builtin::Input => "INPUT",
            Builtin::Output => "OUTPUT",
        }
    }

    /// Owned chain linked from this hook when the kill switch is armed
    pub const fn linked_role(self) -> ChainRole {
        match self {
            Builtin::Input => ChainRole::Inbound,
            Builtin::Output => ChainRole::Outbound,
        }
    }
}

/// Links installed by `on()` (hook → owned chain)
pub const HOOK_LINKS: [Builtin; 2] = [Builtin::Input, Builtin::Output];

/// Links between owned chains installed by setup (`from` jumps to `to`)
pub const INTERNAL_LINKS: [(ChainRole, ChainRole); 1] =
    [(ChainRole::Outbound, ChainRole::Connection)];

/// Returns `true` if `name` belongs to the kill switch namespace
pub fn is_owned_name(name: &str) -> bool {
    ChainRole::ALL.iter().any(|role| role.chain_name() == name)
}
