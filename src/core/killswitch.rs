//! The kill switch state machine
//!
//! Each operation is expressed twice: a pure `plan_*` function returning the
//! ordered [`Command`] list, and a [`KillSwitch`] method handing that plan to
//! an [`Executor`]. The armed/disarmed state is never stored or queried.
//! Operations that could otherwise accumulate duplicates reset first:
//!
//! - `on()` always runs `off()` before linking, so repeated calls leave
//!   exactly one link per hook
//! - `open_by_ip()` always clears the connection chain before adding its
//!   rule, so at most one IP exception exists at a time
//!
//! # Ordering
//!
//! - chains are created before anything links to them
//! - default-deny rules are added after every exception of their chain
//! - hook links are removed and chains flushed before chains are deleted
//!
//! Plans are not atomic. An interrupted run can leave chains created but
//! unlinked, or linked before default-deny is in place.
//!
//! # Broad DNS exception
//!
//! `open_by_domain()` allows UDP port 53 to any destination, not only the
//! resolvers of that domain, until the connection chain is next cleared.

use crate::core::command::{self, Command, ConnState, Protocol, RuleMatch, Target};
use crate::core::error::{Error, Result};
use crate::core::executor::{ExecutionReport, Executor};
use crate::core::registry::{Builtin, ChainRole, Family, HOOK_LINKS, INTERNAL_LINKS, priority};
use tracing::info;

/// Port opened for name resolution by `open_by_domain`
pub const DNS_PORT: u16 = 53;

/// Interface carrying VPN traffic unless configured otherwise
pub const DEFAULT_VPN_INTERFACE: &str = "tun0";

/// Connection states accepted inbound once armed
pub const ALLOWED_STATES: [ConnState; 2] = [ConnState::Related, ConnState::Established];

/// Host specific inputs to the command plans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchSettings {
    pub vpn_interface: String,
}

impl Default for KillSwitchSettings {
    fn default() -> Self {
        Self {
            vpn_interface: DEFAULT_VPN_INTERFACE.to_string(),
        }
    }
}

fn hook_link(family: Family, hook: Builtin, add: bool) -> Command {
    let build = if add {
        command::add_rule
    } else {
        command::remove_rule
    };
    build(
        family,
        hook.chain_name(),
        priority::KILLSWITCH,
        RuleMatch::new(),
        Target::jump(hook.linked_role().chain_name()),
    )
    .permanent()
}

fn base_rule(family: Family, role: ChainRole, matches: RuleMatch) -> Command {
    command::add_rule(
        family,
        role.chain_name(),
        priority::KILLSWITCH,
        matches,
        Target::Accept,
    )
    .permanent()
}

fn default_deny(family: Family, role: ChainRole) -> Command {
    command::add_rule(
        family,
        role.chain_name(),
        priority::LOWEST,
        RuleMatch::new(),
        Target::Drop,
    )
    .permanent()
}

fn flush_owned(permanent: bool) -> impl Iterator<Item = Command> {
    Family::ALL.into_iter().flat_map(move |family| {
        ChainRole::ALL.into_iter().map(move |role| {
            let cmd = command::flush(family, role.chain_name());
            if permanent { cmd.permanent() } else { cmd }
        })
    })
}

/// Creates, clears and populates all owned chains, then reloads.
pub fn plan_setup(settings: &KillSwitchSettings) -> Vec<Command> {
    let mut cmds = Vec::new();

    for family in Family::ALL {
        for role in ChainRole::ALL {
            cmds.push(command::add_chain(family, role.chain_name()).permanent());
        }
    }

    // Chains may survive from an earlier setup
    cmds.extend(flush_owned(true));

    for family in Family::ALL {
        for (from, to) in INTERNAL_LINKS {
            cmds.push(
                command::add_rule(
                    family,
                    from.chain_name(),
                    priority::KILLSWITCH,
                    RuleMatch::new(),
                    Target::jump(to.chain_name()),
                )
                .permanent(),
            );
        }
    }

    for family in Family::ALL {
        cmds.push(base_rule(
            family,
            ChainRole::Inbound,
            RuleMatch::new().in_interface("lo"),
        ));
        cmds.push(base_rule(
            family,
            ChainRole::Outbound,
            RuleMatch::new().out_interface("lo"),
        ));
    }

    // VPN traffic is only permitted over IPv4
    cmds.push(base_rule(
        Family::V4,
        ChainRole::Outbound,
        RuleMatch::new().out_interface(settings.vpn_interface.as_str()),
    ));
    cmds.push(base_rule(
        Family::V4,
        ChainRole::Inbound,
        RuleMatch::new().states(&ALLOWED_STATES),
    ));

    // Default-deny last; IPv6 gets nothing but loopback
    for family in Family::ALL {
        cmds.push(default_deny(family, ChainRole::Inbound));
        cmds.push(default_deny(family, ChainRole::Outbound));
    }

    cmds.push(command::reload());
    cmds
}

/// Unlinks, flushes and deletes all owned chains, then reloads.
pub fn plan_teardown() -> Vec<Command> {
    let mut cmds = plan_off();
    cmds.extend(flush_owned(true));
    for family in Family::ALL {
        for role in ChainRole::ALL {
            cmds.push(command::remove_chain(family, role.chain_name()).permanent());
        }
    }
    cmds.push(command::reload());
    cmds
}

/// Links the owned chains into INPUT/OUTPUT. Always disarms first.
pub fn plan_on() -> Vec<Command> {
    let mut cmds = plan_off();
    for family in Family::ALL {
        for hook in HOOK_LINKS {
            cmds.push(hook_link(family, hook, true));
        }
    }
    cmds.push(command::reload());
    cmds
}

/// Removes the INPUT/OUTPUT links. Missing links are tolerated.
pub fn plan_off() -> Vec<Command> {
    let mut cmds = Vec::new();
    for family in Family::ALL {
        for hook in HOOK_LINKS {
            cmds.push(hook_link(family, hook, false));
        }
    }
    cmds.push(command::reload());
    cmds
}

/// Revokes every opened exception without touching the kill switch itself.
pub fn plan_disconnect() -> Vec<Command> {
    Family::ALL
        .into_iter()
        .map(|family| command::flush(family, ChainRole::Connection.chain_name()))
        .collect()
}

/// Allows ICMP until the connection chain is next cleared.
pub fn plan_ping() -> Vec<Command> {
    vec![command::add_rule(
        Family::V4,
        ChainRole::Connection.chain_name(),
        priority::MEDIUM,
        RuleMatch::new().protocol(Protocol::Icmp),
        Target::Accept,
    )]
}

/// Allows DNS (to any server) and traffic to `domain`. Additive.
pub fn plan_open_by_domain(domain: &str) -> Vec<Command> {
    let chain = ChainRole::Connection.chain_name();
    vec![
        command::add_rule(
            Family::V4,
            chain,
            priority::MEDIUM,
            RuleMatch::new().protocol(Protocol::Udp).dport(DNS_PORT),
            Target::Accept,
        ),
        command::add_rule(
            Family::V4,
            chain,
            priority::MEDIUM,
            RuleMatch::new().destination(domain),
            Target::Accept,
        ),
    ]
}

/// Replaces every exception with a single one for `ip`.
pub fn plan_open_by_ip(ip: &str, protocol: Protocol, port: u16) -> Vec<Command> {
    let chain = ChainRole::Connection.chain_name();
    vec![
        command::flush(Family::V4, chain),
        command::add_rule(
            Family::V4,
            chain,
            priority::CONNECTION,
            RuleMatch::new()
                .protocol(protocol)
                .dport(port)
                .destination(ip),
            Target::Accept,
        ),
    ]
}

/// Removes the outbound accept rule for `ip`. No-op when absent.
///
/// The removal carries `-j ACCEPT` so its argv is the exact mirror of an
/// accept rule added at that slot: firewalld matches direct rules by their
/// full argument list and iptables `-D` needs a target. A bare
/// `--destination <ip>` removal would match no rule on either backend.
pub fn plan_close_by_ip(ip: &str) -> Vec<Command> {
    vec![command::remove_rule(
        Family::V4,
        ChainRole::Outbound.chain_name(),
        priority::CONNECTION,
        RuleMatch::new().destination(ip),
        Target::Accept,
    )]
}

/// Drives an [`Executor`] through the kill switch operations
#[derive(Debug)]
pub struct KillSwitch<E> {
    executor: E,
    settings: KillSwitchSettings,
}

impl<E: Executor> KillSwitch<E> {
    pub fn new(executor: E, settings: KillSwitchSettings) -> Self {
        Self { executor, settings }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Hands a plan to the executor after checking it leaves foreign
    /// chains alone. A plan that fails the check runs nothing.
    async fn apply(&mut self, plan: &[Command]) -> Result<ExecutionReport> {
        if let Some(cmd) = plan.iter().find(|cmd| !cmd.stays_in_owned_chains()) {
            return Err(Error::Internal(format!(
                "refusing to touch a chain drks does not own: {cmd:?}"
            )));
        }
        self.executor.execute(plan).await
    }

    pub async fn setup(&mut self) -> Result<ExecutionReport> {
        info!(vpn_interface = %self.settings.vpn_interface, "Setting up kill switch");
        let report = self.apply(&plan_setup(&self.settings)).await?;
        info!("Kill switch has been set up");
        Ok(report)
    }

    pub async fn teardown(&mut self) -> Result<ExecutionReport> {
        info!("Tearing kill switch down");
        let report = self.apply(&plan_teardown()).await?;
        info!("Kill switch has been removed");
        Ok(report)
    }

    pub async fn on(&mut self) -> Result<ExecutionReport> {
        info!("Turning kill switch on");
        self.apply(&plan_on()).await
    }

    pub async fn off(&mut self) -> Result<ExecutionReport> {
        info!("Turning kill switch off");
        self.apply(&plan_off()).await
    }

    pub async fn disconnect(&mut self) -> Result<ExecutionReport> {
        info!("Clearing opened connections");
        self.apply(&plan_disconnect()).await
    }

    pub async fn ping(&mut self) -> Result<ExecutionReport> {
        info!("Opening firewall for pinging");
        self.apply(&plan_ping()).await
    }

    pub async fn open_by_domain(&mut self, domain: &str) -> Result<ExecutionReport> {
        info!(domain, "Opening firewall for domain");
        self.apply(&plan_open_by_domain(domain)).await
    }

    pub async fn open_by_ip(
        &mut self,
        ip: &str,
        protocol: Protocol,
        port: u16,
    ) -> Result<ExecutionReport> {
        info!(ip, %protocol, port, "Opening firewall for ip address");
        self.apply(&plan_open_by_ip(ip, protocol, port)).await
    }

    pub async fn close_by_ip(&mut self, ip: &str) -> Result<ExecutionReport> {
        info!(ip, "Closing firewall for ip address");
        self.apply(&plan_close_by_ip(ip)).await
    }
}
