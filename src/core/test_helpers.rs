//! Shared test utilities for core module tests
//!
//! Provides a recording executor and a small in-memory packet filter model
//! so operation plans can be checked without touching a real firewall.
//! This module is only compiled in test mode.

use crate::core::command::{Command, RuleSpec, Target};
use crate::core::error::Result;
use crate::core::executor::{ExecutionReport, Executor};
use crate::core::registry::{Builtin, Family};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Spawn processes that depend on `DRKS_TEST_NO_ELEVATION`
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("DRKS_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("DRKS_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// In-memory model of a packet filter with append semantics.
///
/// Duplicate rules are kept (like iptables), so a plan that forgets to
/// reset first shows up as a duplicated rule. Violations of chain lifecycle
/// ordering are collected in `violations` instead of panicking.
#[derive(Debug, Default)]
pub struct SimulatedFirewall {
    pub chains: BTreeMap<(Family, String), Vec<RuleSpec>>,
    pub violations: Vec<String>,
}

impl SimulatedFirewall {
    /// A host with only the built-in hooks present
    pub fn new() -> Self {
        let mut fw = Self::default();
        for family in Family::ALL {
            for hook in [Builtin::Input, Builtin::Output] {
                fw.chains
                    .insert((family, hook.chain_name().to_string()), Vec::new());
            }
        }
        fw
    }

    pub fn rules(&self, family: Family, chain: &str) -> &[RuleSpec] {
        self.chains
            .get(&(family, chain.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_chain(&self, family: Family, chain: &str) -> bool {
        self.chains.contains_key(&(family, chain.to_string()))
    }

    /// Number of rules anywhere that jump to `chain`
    pub fn references_to(&self, family: Family, chain: &str) -> usize {
        self.chains
            .iter()
            .filter(|((f, _), _)| *f == family)
            .flat_map(|(_, rules)| rules)
            .filter(|rule| matches!(&rule.target, Target::Jump(t) if t == chain))
            .count()
    }

    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::AddChain { family, chain, .. } => {
                self.chains.entry((*family, chain.clone())).or_default();
            }
            Command::RemoveChain { family, chain, .. } => {
                let key = (*family, chain.clone());
                if self.references_to(*family, chain) > 0 {
                    self.violations
                        .push(format!("{family} {chain} deleted while still linked"));
                }
                if self.chains.get(&key).is_some_and(|rules| !rules.is_empty()) {
                    self.violations
                        .push(format!("{family} {chain} deleted while not empty"));
                }
                self.chains.remove(&key);
            }
            Command::Flush { family, chain, .. } => {
                match self.chains.get_mut(&(*family, chain.clone())) {
                    Some(rules) => rules.clear(),
                    None => self
                        .violations
                        .push(format!("{family} {chain} flushed before creation")),
                }
            }
            Command::AddRule { family, rule, .. } => {
                if let Target::Jump(target) = &rule.target
                    && !self.has_chain(*family, target)
                {
                    self.violations
                        .push(format!("{family} link to missing chain {target}"));
                }
                match self.chains.get_mut(&(*family, rule.chain.clone())) {
                    Some(rules) => rules.push(rule.clone()),
                    None => self
                        .violations
                        .push(format!("{family} rule added to missing chain {}", rule.chain)),
                }
            }
            Command::RemoveRule { family, rule, .. } => {
                if let Some(rules) = self.chains.get_mut(&(*family, rule.chain.clone()))
                    && let Some(pos) = rules.iter().position(|r| r == rule)
                {
                    rules.remove(pos);
                }
            }
            Command::Reload => {}
        }
    }
}

/// Executor that records every command and applies it to a
/// [`SimulatedFirewall`]
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    /// Every command in execution order
    pub trace: Vec<Command>,
    /// Commands grouped per `execute` call
    pub batches: Vec<Vec<Command>>,
    pub firewall: SimulatedFirewall,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            firewall: SimulatedFirewall::new(),
            ..Self::default()
        }
    }

    /// Forgets recorded commands but keeps the firewall state
    pub fn clear_trace(&mut self) {
        self.trace.clear();
        self.batches.clear();
    }
}

impl Executor for RecordingExecutor {
    async fn execute(&mut self, commands: &[Command]) -> Result<ExecutionReport> {
        for command in commands {
            self.firewall.apply(command);
        }
        self.trace.extend_from_slice(commands);
        self.batches.push(commands.to_vec());
        Ok(ExecutionReport {
            executed: commands.len(),
            ..ExecutionReport::default()
        })
    }
}
