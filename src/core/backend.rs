//! Rendering typed commands into backend invocations
//!
//! This is the only place a [`Command`] turns into text. Each command maps
//! to a single program invocation whose arguments are passed to the process
//! as separate argv entries, never through a shell, so destination values are
//! used verbatim.
//!
//! # Backends
//!
//! - **firewalld**: `firewall-cmd -q --direct [--permanent] <action> <ipv4|ipv6>
//!   filter <chain> [<priority>] [<match-args>] [-j <target>]`. Priorities give
//!   the rule order; `--reload` commits the permanent configuration.
//! - **iptables**: `iptables|ip6tables -N|-X|-F|-A|-D <chain> [<match-args>]
//!   -j <target>`. Rules are ordered by append order, priorities and
//!   permanence are ignored and reload is a no-op.

use crate::core::command::{Command, RuleMatch, RuleSpec};
use crate::core::registry::{FILTER_TABLE, Family};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Packet filter frontend the kill switch drives
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// firewalld direct rules, persisted with `--permanent`
    #[default]
    Firewalld,
    /// Raw iptables/ip6tables chains (runtime only)
    Iptables,
}

/// Binary an invocation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Program {
    #[strum(serialize = "firewall-cmd")]
    FirewallCmd,
    #[strum(serialize = "iptables")]
    Iptables,
    #[strum(serialize = "ip6tables")]
    Ip6tables,
}

/// A fully rendered backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: Program,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl Backend {
    /// Renders a command for this backend.
    ///
    /// Returns `None` when the command has no equivalent (iptables has
    /// nothing to reload).
    pub fn render(&self, cmd: &Command) -> Option<Invocation> {
        match self {
            Backend::Firewalld => Some(render_firewalld(cmd)),
            Backend::Iptables => render_iptables(cmd),
        }
    }
}

fn render_firewalld(cmd: &Command) -> Invocation {
    let mut args: Vec<String> = vec!["-q".into()];

    if let Command::Reload = cmd {
        args.push("--reload".into());
        return Invocation {
            program: Program::FirewallCmd,
            args,
        };
    }

    args.push("--direct".into());
    if cmd.is_permanent() {
        args.push("--permanent".into());
    }

    match cmd {
        Command::AddChain { family, chain, .. } => {
            args.push("--add-chain".into());
            push_table(&mut args, *family, chain);
        }
        Command::RemoveChain { family, chain, .. } => {
            args.push("--remove-chain".into());
            push_table(&mut args, *family, chain);
        }
        Command::Flush { family, chain, .. } => {
            args.push("--remove-rules".into());
            push_table(&mut args, *family, chain);
        }
        Command::AddRule { family, rule, .. } => {
            args.push("--add-rule".into());
            push_rule(&mut args, *family, rule);
        }
        Command::RemoveRule { family, rule, .. } => {
            args.push("--remove-rule".into());
            push_rule(&mut args, *family, rule);
        }
        Command::Reload => unreachable!("reload handled above"),
    }

    Invocation {
        program: Program::FirewallCmd,
        args,
    }
}

fn push_table(args: &mut Vec<String>, family: Family, chain: &str) {
    args.push(family.as_str().into());
    args.push(FILTER_TABLE.into());
    args.push(chain.into());
}

fn push_rule(args: &mut Vec<String>, family: Family, rule: &RuleSpec) {
    push_table(args, family, &rule.chain);
    args.push(rule.priority.to_string());
    push_matches(args, &rule.matches);
    args.push("-j".into());
    args.push(rule.target.to_string());
}

fn render_iptables(cmd: &Command) -> Option<Invocation> {
    let family = cmd.family()?;
    let program = match family {
        Family::V4 => Program::Iptables,
        Family::V6 => Program::Ip6tables,
    };

    let mut args: Vec<String> = Vec::new();
    match cmd {
        Command::AddChain { chain, .. } => {
            args.push("-N".into());
            args.push(chain.clone());
        }
        Command::RemoveChain { chain, .. } => {
            args.push("-X".into());
            args.push(chain.clone());
        }
        Command::Flush { chain, .. } => {
            args.push("-F".into());
            args.push(chain.clone());
        }
        Command::AddRule { rule, .. } | Command::RemoveRule { rule, .. } => {
            let flag = if matches!(cmd, Command::AddRule { .. }) {
                "-A"
            } else {
                "-D"
            };
            args.push(flag.into());
            args.push(rule.chain.clone());
            push_matches(&mut args, &rule.matches);
            args.push("-j".into());
            args.push(rule.target.to_string());
        }
        Command::Reload => return None,
    }

    Some(Invocation { program, args })
}

/// Match arguments shared by both backends, in a fixed order so identical
/// rules always render identically (firewalld matches removals by text).
fn push_matches(args: &mut Vec<String>, matches: &RuleMatch) {
    if let Some(protocol) = matches.protocol {
        args.push("-p".into());
        args.push(protocol.to_string());
        if let Some(port) = matches.dport {
            args.push("--dport".into());
            args.push(port.to_string());
        }
    }
    if let Some(destination) = &matches.destination {
        args.push("--destination".into());
        args.push(destination.clone());
    }
    if let Some(iface) = &matches.in_interface {
        args.push("-i".into());
        args.push(iface.clone());
    }
    if let Some(iface) = &matches.out_interface {
        args.push("-o".into());
        args.push(iface.clone());
    }
    if !matches.states.is_empty() {
        let states: Vec<String> = matches.states.iter().map(ToString::to_string).collect();
        args.push("-m".into());
        args.push("state".into());
        args.push("--state".into());
        args.push(states.join(","));
    }
}
