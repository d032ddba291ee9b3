//! DRKS - Dumb Rust Kill Switch
//!
//! Command line front end for the kill switch.
//!
//! # Usage
//!
//! ```bash
//! drks killswitch setup              # Create and populate the chains
//! drks killswitch on                 # Arm: only VPN traffic leaves the host
//! drks 185.2.3.4 udp 1194            # Open a single VPN server endpoint
//! drks vpn.example.com               # Open DNS and a domain
//! drks killswitch disconnect         # Revoke every opened exception
//! drks killswitch off                # Disarm
//! drks killswitch teardown           # Remove everything drks created
//! drks close 185.2.3.4               # Drop the exception for an address
//! drks --dry-run killswitch setup    # Print the backend commands only
//! drks --backend iptables config save  # Persist flags as the new defaults
//! ```
//!
//! # Exit Status
//!
//! `0` on completion, `1` on invalid arguments, lock contention, elevation
//! failures or backend failures under the `report`/`abort` failure policies.
//!
//! Flags go before the subcommand or target; `quiet` set in the config file
//! silences logging just like `-q`.

use clap::{Parser, Subcommand, ValueEnum};
use drks::audit::{self, EventType};
use drks::config::{self, AppConfig};
use drks::core::command::Protocol;
use drks::core::error::BackendErrorPattern;
use drks::lock::OperationLock;
use drks::utils;
use drks::validators::{self, TargetKind};
use drks::{
    Backend, DryRunExecutor, Error, ExecutionReport, Executor, FailurePolicy, KillSwitch, Result,
    SystemExecutor,
};
use std::net::Ipv4Addr;
use std::process::ExitCode;
use tracing::{Level, info, warn};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "drks")]
#[command(about = "Dumb Rust Kill Switch - A VPN kill switch for firewalld and iptables", long_about = None)]
#[command(
    arg_required_else_help = true,
    after_help = "Opening exceptions:\n  drks <IPV4> <tcp|udp> <PORT>   Allow a single VPN endpoint\n  drks <DOMAIN>                  Allow DNS and a domain"
)]
struct Cli {
    /// Suppress progress output and backend output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Firewall backend (default from config, else firewalld)
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// What to do when a backend command fails
    #[arg(long, global = true, value_enum)]
    failure_policy: Option<FailurePolicy>,

    /// VPN interface allowed out while armed (default from config, else tun0)
    #[arg(long, global = true, value_name = "IFACE")]
    interface: Option<String>,

    /// Print the backend commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print version, commit and build time
    #[arg(long)]
    build_info: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the kill switch itself
    Killswitch {
        #[arg(value_enum)]
        action: Action,
    },
    /// Remove the exception previously opened for an IPv4 address
    Close {
        /// IPv4 address to close
        ip: String,
    },
    /// Inspect or persist the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// `<IPV4> <PROTOCOL> <PORT>` or `<DOMAIN>`
    #[command(external_subcommand)]
    Open(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Arm: link the chains into INPUT/OUTPUT
    On,
    /// Disarm: unlink the chains
    Off,
    /// Create and populate the chains
    Setup,
    /// Disarm and delete the chains
    Teardown,
    /// Revoke every opened exception
    Disconnect,
    /// Allow ICMP until the next disconnect
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum ConfigAction {
    /// Print the config after flag overrides as JSON
    Show,
    /// Write the config after flag overrides to the data directory
    Save,
}

/// A fully validated firewall operation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Setup,
    Teardown,
    On,
    Off,
    Disconnect,
    Ping,
    OpenDomain(String),
    OpenIp {
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    },
    CloseIp(Ipv4Addr),
}

impl Operation {
    fn event_type(&self) -> EventType {
        match self {
            Operation::Setup => EventType::Setup,
            Operation::Teardown => EventType::Teardown,
            Operation::On => EventType::On,
            Operation::Off => EventType::Off,
            Operation::Disconnect => EventType::Disconnect,
            Operation::Ping => EventType::Ping,
            Operation::OpenDomain(_) => EventType::OpenDomain,
            Operation::OpenIp { .. } => EventType::OpenIp,
            Operation::CloseIp(_) => EventType::CloseIp,
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            Operation::OpenDomain(domain) => serde_json::json!({ "domain": domain }),
            Operation::OpenIp { ip, protocol, port } => serde_json::json!({
                "ip": ip.to_string(),
                "protocol": protocol.to_string(),
                "port": port,
            }),
            Operation::CloseIp(ip) => serde_json::json!({ "ip": ip.to_string() }),
            _ => serde_json::json!({}),
        }
    }
}

impl From<Action> for Operation {
    fn from(action: Action) -> Self {
        match action {
            Action::On => Operation::On,
            Action::Off => Operation::Off,
            Action::Setup => Operation::Setup,
            Action::Teardown => Operation::Teardown,
            Action::Disconnect => Operation::Disconnect,
            Action::Ping => Operation::Ping,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Firewall(Operation),
    Config(ConfigAction),
}

/// Turns the parsed arguments into a request, validating every value
/// before anything touches the firewall.
fn resolve_request(cli: &Cli) -> Result<Request> {
    match &cli.command {
        Some(Commands::Killswitch { action }) => Ok(Request::Firewall((*action).into())),
        Some(Commands::Close { ip }) => validators::validate_ipv4_target(ip)
            .map(|ip| Request::Firewall(Operation::CloseIp(ip)))
            .map_err(|e| Error::validation("ip", e)),
        Some(Commands::Config { action }) => Ok(Request::Config(*action)),
        Some(Commands::Open(args)) => resolve_target(args).map(Request::Firewall),
        None => Err(Error::validation(
            "target",
            "expected killswitch, close, config, an IPv4 address or a domain",
        )),
    }
}

/// Resolves `<target> [protocol port]` given in place of a subcommand
fn resolve_target(args: &[String]) -> Result<Operation> {
    let Some((target, rest)) = args.split_first() else {
        return Err(Error::validation("target", "missing target"));
    };

    // Flags after the target would otherwise be taken as plain words
    if let Some(flag) = rest.iter().find(|arg| arg.starts_with('-')) {
        return Err(Error::validation(
            "target",
            format!("'{flag}' must come before the target"),
        ));
    }

    match validators::classify_target(target) {
        TargetKind::Ip(ip) => {
            let [protocol, port, extra @ ..] = rest else {
                return Err(Error::validation(
                    "target",
                    format!("{ip} needs a protocol and a port, e.g. `drks {ip} udp 1194`"),
                ));
            };
            if !extra.is_empty() {
                warn!("Ignoring extra arguments: {}", extra.join(" "));
            }
            let protocol =
                validators::validate_protocol(protocol).map_err(|e| Error::validation("protocol", e))?;
            let port = validators::validate_port(port).map_err(|e| Error::validation("port", e))?;
            Ok(Operation::OpenIp { ip, protocol, port })
        }
        TargetKind::Domain(domain) => {
            if !rest.is_empty() {
                warn!("Protocol and port are ignored for domain targets");
            }
            Ok(Operation::OpenDomain(domain))
        }
        TargetKind::Unrecognized => Err(Error::validation(
            "target",
            format!("'{target}' is neither an IPv4 address nor a domain"),
        )),
    }
}

/// Command line flags take precedence over the stored config
fn apply_overrides(mut config: AppConfig, cli: &Cli) -> Result<AppConfig> {
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(policy) = cli.failure_policy {
        config.failure_policy = policy;
    }
    if let Some(interface) = &cli.interface {
        config.vpn_interface = interface.clone();
    }
    config.quiet = cli.quiet || (config.quiet && !cli.verbose);
    config.vpn_interface = validators::validate_interface(&config.vpn_interface)
        .map_err(|e| Error::validation("interface", e))?;
    Ok(config)
}

fn init_logging(quiet: bool, verbose: bool) {
    if quiet {
        return;
    }
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn print_build_info() {
    println!("drks {}", build::PKG_VERSION);
    println!("commit:     {}", build::SHORT_COMMIT);
    println!("build time: {}", build::BUILD_TIME);
    println!("rust:       {}", build::RUST_VERSION);
}

async fn dispatch<E: Executor>(ks: &mut KillSwitch<E>, op: &Operation) -> Result<ExecutionReport> {
    match op {
        Operation::Setup => ks.setup().await,
        Operation::Teardown => ks.teardown().await,
        Operation::On => ks.on().await,
        Operation::Off => ks.off().await,
        Operation::Disconnect => ks.disconnect().await,
        Operation::Ping => ks.ping().await,
        Operation::OpenDomain(domain) => ks.open_by_domain(domain).await,
        Operation::OpenIp { ip, protocol, port } => {
            ks.open_by_ip(&ip.to_string(), *protocol, *port).await
        }
        Operation::CloseIp(ip) => ks.close_by_ip(&ip.to_string()).await,
    }
}

fn print_failures(report: &ExecutionReport) {
    for failure in &report.failures {
        let translation = BackendErrorPattern::match_error(&failure.stderr);
        eprintln!("✗ {}", failure.invocation);
        eprintln!("  {}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

async fn run(config: AppConfig, dry_run: bool, op: Operation) -> Result<ExecutionReport> {
    let settings = config.killswitch_settings();

    if dry_run {
        let mut ks = KillSwitch::new(DryRunExecutor::new(config.backend), settings);
        return dispatch(&mut ks, &op).await;
    }

    if let Err(e) = utils::ensure_dirs() {
        warn!("Failed to create state directories: {e}");
    }

    let _lock = match config.lock_file.clone().or_else(utils::default_lock_path) {
        Some(path) => Some(OperationLock::acquire(&path)?),
        None => {
            warn!("No state directory, running without the operation lock");
            None
        }
    };

    let executor = SystemExecutor::new(config.backend, config.executor_config());
    let mut ks = KillSwitch::new(executor, settings);
    let outcome = dispatch(&mut ks, &op).await;

    if config.audit_enabled {
        audit::log_operation(op.event_type(), op.details(), &outcome).await;
    }

    outcome
}

async fn run_config(action: ConfigAction, config: &AppConfig, dry_run: bool) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    if action == ConfigAction::Show || dry_run {
        println!("{json}");
        return Ok(());
    }

    utils::ensure_dirs()?;
    config::save_config(config).await?;
    info!("Configuration saved");
    Ok(())
}

fn report_error(e: &Error) {
    match e {
        Error::Backend {
            message, stderr, ..
        } => {
            eprintln!("Error: {message}");
            let translation = BackendErrorPattern::match_error(stderr.as_deref().unwrap_or(""));
            eprintln!("  {}", translation.user_message);
            for suggestion in &translation.suggestions {
                eprintln!("  - {suggestion}");
            }
        }
        e => eprintln!("Error: {e}"),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if cli.build_info {
        print_build_info();
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The stored `quiet` decides whether logging is set up at all
    let config = match apply_overrides(runtime.block_on(config::load_config()), &cli) {
        Ok(config) => config,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.quiet, cli.verbose);

    let request = match resolve_request(&cli) {
        Ok(request) => request,
        Err(e) => {
            if !config.quiet {
                eprintln!("Error: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    let outcome = match request {
        Request::Config(action) => runtime
            .block_on(run_config(action, &config, cli.dry_run))
            .map(|()| ExecutionReport::default()),
        Request::Firewall(op) => runtime.block_on(run(config, cli.dry_run, op)),
    };

    match outcome {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            print_failures(&report);
            ExitCode::FAILURE
        }
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}
