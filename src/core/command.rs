//! Typed backend commands and their constructors
//!
//! A [`Command`] describes one firewall mutation independently of the
//! backend that will carry it out. Commands are plain values: building one
//! has no side effects and the same input always yields an equal command,
//! which keeps operation plans comparable in tests. Rendering to argv happens
//! in [`crate::core::backend`].
//!
//! # Example
//!
//! ```
//! use drks::core::command::{self, RuleMatch, Target};
//! use drks::core::registry::{priority, Family};
//!
//! let cmd = command::add_rule(
//!     Family::V4,
//!     "drks_conn",
//!     priority::MEDIUM,
//!     RuleMatch::new().protocol(command::Protocol::Icmp),
//!     Target::Accept,
//! );
//! assert_eq!(cmd.chain(), Some("drks_conn"));
//! ```

use crate::core::registry::{Family, is_owned_name};
use std::fmt;

/// Layer 4 protocol accepted in rule matches
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Udp,
    Tcp,
}

/// Connection tracking state for `-m state --state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnState {
    New,
    Related,
    Established,
    Invalid,
}

/// What happens to a packet that matches a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Accept,
    Drop,
    /// Continue evaluation in another chain
    Jump(String),
}

impl Target {
    pub fn jump(chain: &str) -> Self {
        Target::Jump(normalize_chain(chain))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Accept => f.write_str("ACCEPT"),
            Target::Drop => f.write_str("DROP"),
            Target::Jump(chain) => f.write_str(chain),
        }
    }
}

/// Match criteria of a rule. Every field is optional; an empty match
/// applies to all packets entering the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleMatch {
    pub protocol: Option<Protocol>,
    pub dport: Option<u16>,
    /// IP literal or hostname, passed to the backend verbatim
    pub destination: Option<String>,
    pub in_interface: Option<String>,
    pub out_interface: Option<String>,
    pub states: Vec<ConnState>,
}

impl RuleMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn dport(mut self, port: u16) -> Self {
        self.dport = Some(port);
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn in_interface(mut self, iface: impl Into<String>) -> Self {
        self.in_interface = Some(iface.into());
        self
    }

    pub fn out_interface(mut self, iface: impl Into<String>) -> Self {
        self.out_interface = Some(iface.into());
        self
    }

    pub fn states(mut self, states: &[ConnState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A rule addressed to one chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSpec {
    pub chain: String,
    pub priority: i32,
    pub matches: RuleMatch,
    pub target: Target,
}

/// One firewall mutation, ready to be rendered for a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    AddChain {
        family: Family,
        chain: String,
        permanent: bool,
    },
    RemoveChain {
        family: Family,
        chain: String,
        permanent: bool,
    },
    AddRule {
        family: Family,
        rule: RuleSpec,
        permanent: bool,
    },
    RemoveRule {
        family: Family,
        rule: RuleSpec,
        permanent: bool,
    },
    /// Remove every rule of a chain, keeping the chain itself
    Flush {
        family: Family,
        chain: String,
        permanent: bool,
    },
    /// Commit permanent configuration to the runtime ruleset
    Reload,
}

/// Discriminant of a [`Command`], handy for trace assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CommandKind {
    AddChain,
    RemoveChain,
    AddRule,
    RemoveRule,
    Flush,
    Reload,
}

impl Command {
    /// Marks the command as targeting the backend's permanent configuration.
    /// Has no effect on [`Command::Reload`].
    pub fn permanent(mut self) -> Self {
        match &mut self {
            Command::AddChain { permanent, .. }
            | Command::RemoveChain { permanent, .. }
            | Command::AddRule { permanent, .. }
            | Command::RemoveRule { permanent, .. }
            | Command::Flush { permanent, .. } => *permanent = true,
            Command::Reload => {}
        }
        self
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::AddChain { .. } => CommandKind::AddChain,
            Command::RemoveChain { .. } => CommandKind::RemoveChain,
            Command::AddRule { .. } => CommandKind::AddRule,
            Command::RemoveRule { .. } => CommandKind::RemoveRule,
            Command::Flush { .. } => CommandKind::Flush,
            Command::Reload => CommandKind::Reload,
        }
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            Command::AddChain { family, .. }
            | Command::RemoveChain { family, .. }
            | Command::AddRule { family, .. }
            | Command::RemoveRule { family, .. }
            | Command::Flush { family, .. } => Some(*family),
            Command::Reload => None,
        }
    }

    /// Chain the command operates on
    pub fn chain(&self) -> Option<&str> {
        match self {
            Command::AddChain { chain, .. }
            | Command::RemoveChain { chain, .. }
            | Command::Flush { chain, .. } => Some(chain.as_str()),
            Command::AddRule { rule, .. } | Command::RemoveRule { rule, .. } => {
                Some(rule.chain.as_str())
            }
            Command::Reload => None,
        }
    }

    pub fn rule(&self) -> Option<&RuleSpec> {
        match self {
            Command::AddRule { rule, .. } | Command::RemoveRule { rule, .. } => Some(rule),
            _ => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        match self {
            Command::AddChain { permanent, .. }
            | Command::RemoveChain { permanent, .. }
            | Command::AddRule { permanent, .. }
            | Command::RemoveRule { permanent, .. }
            | Command::Flush { permanent, .. } => *permanent,
            Command::Reload => false,
        }
    }

    /// Chain this command's rule jumps to, if it is a link
    pub fn jump_target(&self) -> Option<&str> {
        match &self.rule()?.target {
            Target::Jump(chain) => Some(chain.as_str()),
            _ => None,
        }
    }

    /// `true` for a match-everything DROP rule
    pub fn is_default_deny(&self) -> bool {
        self.rule()
            .is_some_and(|rule| rule.target == Target::Drop && rule.matches.is_empty())
    }

    /// `true` if the command only touches chains drks owns. The single
    /// exception is a bare jump from a built-in hook into an owned chain,
    /// which is how the chains get linked in.
    pub fn stays_in_owned_chains(&self) -> bool {
        match self {
            Command::AddChain { chain, .. }
            | Command::RemoveChain { chain, .. }
            | Command::Flush { chain, .. } => is_owned_name(chain),
            Command::AddRule { rule, .. } | Command::RemoveRule { rule, .. } => {
                is_owned_name(&rule.chain)
                    || (rule.matches.is_empty()
                        && matches!(&rule.target, Target::Jump(to) if is_owned_name(to)))
            }
            Command::Reload => true,
        }
    }
}

/// Strips whitespace and stray separators a caller may have left around a
/// chain name.
pub fn normalize_chain(name: &str) -> String {
    name.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
        .trim_end()
        .to_string()
}

pub fn add_chain(family: Family, chain: &str) -> Command {
    Command::AddChain {
        family,
        chain: normalize_chain(chain),
        permanent: false,
    }
}

pub fn remove_chain(family: Family, chain: &str) -> Command {
    Command::RemoveChain {
        family,
        chain: normalize_chain(chain),
        permanent: false,
    }
}

pub fn flush(family: Family, chain: &str) -> Command {
    Command::Flush {
        family,
        chain: normalize_chain(chain),
        permanent: false,
    }
}

pub fn add_rule(
    family: Family,
    chain: &str,
    priority: i32,
    matches: RuleMatch,
    target: Target,
) -> Command {
    Command::AddRule {
        family,
        rule: RuleSpec {
            chain: normalize_chain(chain),
            priority,
            matches,
            target,
        },
        permanent: false,
    }
}

pub fn remove_rule(
    family: Family,
    chain: &str,
    priority: i32,
    matches: RuleMatch,
    target: Target,
) -> Command {
    Command::RemoveRule {
        family,
        rule: RuleSpec {
            chain: normalize_chain(chain),
            priority,
            matches,
            target,
        },
        permanent: false,
    }
}

pub fn reload() -> Command {
    Command::Reload
}
