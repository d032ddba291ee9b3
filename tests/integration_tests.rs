//! Integration tests for DRKS
//!
//! These tests drive the kill switch end to end through [`SystemExecutor`]
//! against generated mock backends: small shell scripts named
//! `firewall-cmd`, `iptables` and `ip6tables` that append their argv to a
//! log file. No privileges or real firewall are needed.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use drks::core::backend::Backend;
use drks::core::command::{Command, Protocol};
use drks::core::executor::{BackendPaths, ExecutorConfig, FailurePolicy, SystemExecutor};
use drks::core::killswitch::{self, KillSwitch, KillSwitchSettings};
use drks::{Error, lock::OperationLock};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use tempfile::TempDir;

/// A directory of mock backend binaries sharing one invocation log
struct MockBackend {
    dir: TempDir,
}

impl MockBackend {
    /// Mocks that always succeed
    fn new() -> Self {
        Self::failing_on("")
    }

    /// Mocks that exit 1 whenever their arguments contain `pattern`
    fn failing_on(pattern: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("invocations.log");

        for name in ["firewall-cmd", "iptables", "ip6tables"] {
            let fail = if pattern.is_empty() {
                String::new()
            } else {
                format!(
                    "case \"$*\" in *'{pattern}'*) echo \"{name}: Bad rule (does a matching rule exist in that chain?).\" >&2; exit 1;; esac\n"
                )
            };
            let script = format!(
                "#!/bin/sh\necho \"{name} $*\" >> '{}'\n{fail}exit 0\n",
                log.display()
            );
            let path = dir.path().join(name);
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        // SAFETY: every test sets the same value
        unsafe {
            std::env::set_var("DRKS_TEST_NO_ELEVATION", "1");
        }

        Self { dir }
    }

    fn paths(&self) -> BackendPaths {
        BackendPaths {
            firewall_cmd: self.dir.path().join("firewall-cmd"),
            iptables: self.dir.path().join("iptables"),
            ip6tables: self.dir.path().join("ip6tables"),
        }
    }

    fn killswitch(&self, backend: Backend, policy: FailurePolicy) -> KillSwitch<SystemExecutor> {
        let config = ExecutorConfig {
            quiet: true,
            failure_policy: policy,
            paths: self.paths(),
        };
        KillSwitch::new(
            SystemExecutor::new(backend, config),
            KillSwitchSettings::default(),
        )
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("invocations.log")
    }

    fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn rendered(backend: Backend, plan: &[Command]) -> Vec<String> {
    plan.iter()
        .filter_map(|c| backend.render(c))
        .map(|i| i.to_string())
        .collect()
}

fn drks_bin() -> &'static str {
    env!("CARGO_BIN_EXE_drks")
}

// ============================================================================
// Kill switch operations against mock backends
// ============================================================================

#[tokio::test]
async fn test_firewalld_setup_runs_plan_in_order() {
    let mock = MockBackend::new();
    let mut ks = mock.killswitch(Backend::Firewalld, FailurePolicy::Ignore);

    let report = ks.setup().await.unwrap();

    let expected = rendered(
        Backend::Firewalld,
        &killswitch::plan_setup(&KillSwitchSettings::default()),
    );
    assert_eq!(mock.invocations(), expected);
    assert_eq!(report.executed, expected.len());
    assert_eq!(
        mock.invocations().first().map(String::as_str),
        Some("firewall-cmd -q --direct --permanent --add-chain ipv4 filter drks_inbound")
    );
    assert_eq!(
        mock.invocations().last().map(String::as_str),
        Some("firewall-cmd -q --reload")
    );
}

#[tokio::test]
async fn test_iptables_on_skips_reload() {
    let mock = MockBackend::new();
    let mut ks = mock.killswitch(Backend::Iptables, FailurePolicy::Ignore);

    let report = ks.on().await.unwrap();

    assert_eq!(
        mock.invocations(),
        vec![
            "iptables -D INPUT -j drks_inbound",
            "iptables -D OUTPUT -j drks_outbound",
            "ip6tables -D INPUT -j drks_inbound",
            "ip6tables -D OUTPUT -j drks_outbound",
            "iptables -A INPUT -j drks_inbound",
            "iptables -A OUTPUT -j drks_outbound",
            "ip6tables -A INPUT -j drks_inbound",
            "ip6tables -A OUTPUT -j drks_outbound",
        ]
    );
    assert_eq!(report.skipped, 2);
}

#[tokio::test]
async fn test_open_by_ip_flushes_first() {
    let mock = MockBackend::new();
    let mut ks = mock.killswitch(Backend::Firewalld, FailurePolicy::Ignore);

    ks.open_by_ip("185.2.3.4", Protocol::Udp, 1194).await.unwrap();

    assert_eq!(
        mock.invocations(),
        vec![
            "firewall-cmd -q --direct --remove-rules ipv4 filter drks_conn",
            "firewall-cmd -q --direct --add-rule ipv4 filter drks_conn 199 -p udp --dport 1194 --destination 185.2.3.4 -j ACCEPT",
        ]
    );
}

#[tokio::test]
async fn test_destination_with_spaces_stays_one_argument() {
    let mock = MockBackend::new();
    let mut ks = mock.killswitch(Backend::Iptables, FailurePolicy::Ignore);

    // Never interpreted by a shell on the way to the backend
    ks.open_by_domain("a.com; touch pwned").await.unwrap();

    assert!(!mock.dir.path().join("pwned").exists());
    assert!(!Path::new("pwned").exists());
    assert_eq!(mock.invocations().len(), 2);
}

#[tokio::test]
async fn test_ignore_policy_hides_failures() {
    let mock = MockBackend::failing_on("-D");
    let mut ks = mock.killswitch(Backend::Iptables, FailurePolicy::Ignore);

    let report = ks.off().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.executed, 4);
}

#[tokio::test]
async fn test_report_policy_collects_failures() {
    let mock = MockBackend::failing_on("-D");
    let mut ks = mock.killswitch(Backend::Iptables, FailurePolicy::Report);

    let report = ks.off().await.unwrap();

    assert_eq!(report.executed, 4);
    assert_eq!(report.failures.len(), 4);
    let first = &report.failures[0];
    assert_eq!(first.invocation, "iptables -D INPUT -j drks_inbound");
    assert_eq!(first.exit_code, Some(1));
    assert!(first.stderr.contains("Bad rule"));
}

#[tokio::test]
async fn test_abort_policy_stops_at_first_failure() {
    let mock = MockBackend::failing_on("--remove-rule ");
    let mut ks = mock.killswitch(Backend::Firewalld, FailurePolicy::Abort);

    let result = ks.teardown().await;

    assert!(matches!(
        result,
        Err(Error::Backend {
            exit_code: Some(1),
            ..
        })
    ));
    assert_eq!(mock.invocations().len(), 1);
}

#[tokio::test]
async fn test_missing_backend_binary_is_reported() {
    let mock = MockBackend::new();
    let config = ExecutorConfig {
        quiet: true,
        failure_policy: FailurePolicy::Report,
        paths: BackendPaths {
            firewall_cmd: mock.dir.path().join("does-not-exist"),
            ..mock.paths()
        },
    };
    let mut ks = KillSwitch::new(
        SystemExecutor::new(Backend::Firewalld, config),
        KillSwitchSettings::default(),
    );

    let report = ks.ping().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].exit_code, None);
}

#[tokio::test]
async fn test_full_lifecycle_on_iptables() {
    let mock = MockBackend::new();
    let mut ks = mock.killswitch(Backend::Iptables, FailurePolicy::Report);

    ks.setup().await.unwrap();
    ks.on().await.unwrap();
    ks.open_by_domain("vpn.example.com").await.unwrap();
    ks.disconnect().await.unwrap();
    ks.teardown().await.unwrap();

    let log = mock.invocations();
    let first_delete = log
        .iter()
        .position(|l| l.starts_with("iptables -X"))
        .unwrap();
    let last_unlink = log
        .iter()
        .rposition(|l| l == "iptables -D OUTPUT -j drks_outbound")
        .unwrap();
    assert!(last_unlink < first_delete);
    assert!(log.iter().any(|l| l == "iptables -A drks_outbound -o tun0 -j ACCEPT"));
}

// ============================================================================
// Lock
// ============================================================================

#[test]
fn test_operation_lock_blocks_second_holder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("drks.lock");

    let _held = OperationLock::acquire(&path).unwrap();
    assert!(matches!(
        OperationLock::acquire(&path),
        Err(Error::Locked(_))
    ));
}

// ============================================================================
// Binary
// ============================================================================

/// XDG directories for one binary run, so the user's real config, lock and
/// audit log are never read or written
struct Home {
    dir: TempDir,
}

impl Home {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn with_config(json: &str) -> Self {
        let home = Self::new();
        let config_dir = home.data_dir();
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.json"), json).unwrap();
        home
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data").join("drks")
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state").join("drks")
    }

    fn drks(&self, args: &[&str]) -> std::process::Output {
        Process::new(drks_bin())
            .args(args)
            .env("HOME", self.dir.path())
            .env("XDG_DATA_HOME", self.dir.path().join("data"))
            .env("XDG_STATE_HOME", self.dir.path().join("state"))
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("DRKS_TEST_NO_ELEVATION", "1")
            .env_remove("DRKS_ELEVATION_METHOD")
            .output()
            .unwrap()
    }
}

fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_cli_dry_run_prints_commands() {
    let output = Home::new().drks(&["-q", "--dry-run", "--backend", "iptables", "killswitch", "off"]);

    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![
            "iptables -D INPUT -j drks_inbound",
            "iptables -D OUTPUT -j drks_outbound",
            "ip6tables -D INPUT -j drks_inbound",
            "ip6tables -D OUTPUT -j drks_outbound",
        ]
    );
}

#[test]
fn test_cli_quiet_killswitch_actions() {
    let settings = KillSwitchSettings::default();
    let actions = [
        ("on", killswitch::plan_on()),
        ("off", killswitch::plan_off()),
        ("setup", killswitch::plan_setup(&settings)),
        ("teardown", killswitch::plan_teardown()),
        ("disconnect", killswitch::plan_disconnect()),
        ("ping", killswitch::plan_ping()),
    ];
    let home = Home::new();

    for backend in [Backend::Firewalld, Backend::Iptables] {
        for (action, plan) in &actions {
            let output = home.drks(&[
                "-q",
                "--dry-run",
                "--backend",
                &backend.to_string(),
                "killswitch",
                action,
            ]);

            assert_eq!(output.status.code(), Some(0), "{backend} {action}");
            assert_eq!(stdout_lines(&output), rendered(backend, plan), "{backend} {action}");
            assert!(output.stderr.is_empty(), "{backend} {action}");
        }
    }
}

#[test]
fn test_cli_quiet_close() {
    let output = Home::new().drks(&["-q", "--dry-run", "close", "10.0.0.5"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout_lines(&output),
        vec![
            "firewall-cmd -q --direct --remove-rule ipv4 filter drks_outbound 199 --destination 10.0.0.5 -j ACCEPT"
        ]
    );
}

#[test]
fn test_cli_dry_run_open_by_ip() {
    let output = Home::new().drks(&["-q", "--dry-run", "--backend", "firewalld", "10.0.0.5", "tcp", "443"]);

    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        rendered(
            Backend::Firewalld,
            &killswitch::plan_open_by_ip("10.0.0.5", Protocol::Tcp, 443)
        )
    );
}

#[test]
fn test_cli_quiet_from_config_file() {
    let home = Home::with_config(r#"{"quiet": true}"#);

    let output = home.drks(&["killswitch", "--dry-run", "on"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(
        output.stderr.is_empty(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout_lines(&output), rendered(Backend::Firewalld, &killswitch::plan_on()));
}

#[test]
fn test_cli_logs_without_quiet() {
    let output = Home::new().drks(&["--dry-run", "killswitch", "ping"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Opening firewall for pinging"));
}

#[test]
fn test_cli_quiet_unrecognized_target_is_silent() {
    let output = Home::new().drks(&["-q", "not_a_target"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stderr.is_empty());
    assert!(output.stdout.is_empty());

    let loud = Home::new().drks(&["not_a_target"]);
    assert_eq!(loud.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&loud.stderr).contains("neither an IPv4 address nor a domain"));
}

#[test]
fn test_cli_config_save_then_show() {
    let home = Home::new();

    let saved = home.drks(&["-q", "--backend", "iptables", "--interface", "wg0", "config", "save"]);
    assert_eq!(saved.status.code(), Some(0));

    let json = std::fs::read_to_string(home.data_dir().join("config.json")).unwrap();
    let stored: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(stored["backend"], "iptables");
    assert_eq!(stored["vpn_interface"], "wg0");

    let shown = home.drks(&["config", "show"]);
    assert!(shown.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&shown.stdout).unwrap();
    assert_eq!(shown["backend"], "iptables");
    assert_eq!(shown["vpn_interface"], "wg0");
}

#[test]
fn test_cli_runs_against_configured_backend() {
    let mock = MockBackend::new();
    let paths = mock.paths();
    let home = Home::with_config(
        &serde_json::json!({
            "backend": "iptables",
            "paths": {
                "firewall_cmd": paths.firewall_cmd,
                "iptables": paths.iptables,
                "ip6tables": paths.ip6tables,
            },
        })
        .to_string(),
    );

    let on = home.drks(&["-q", "killswitch", "on"]);
    assert_eq!(on.status.code(), Some(0));
    let close = home.drks(&["-q", "close", "10.0.0.5"]);
    assert_eq!(close.status.code(), Some(0));

    let mut expected = rendered(Backend::Iptables, &killswitch::plan_on());
    expected.extend(rendered(
        Backend::Iptables,
        &killswitch::plan_close_by_ip("10.0.0.5"),
    ));
    assert_eq!(mock.invocations(), expected);

    let audit = std::fs::read_to_string(home.state_dir().join("audit.log")).unwrap();
    let events: Vec<serde_json::Value> = audit
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event_type"], "on");
    assert_eq!(events[1]["event_type"], "close_ip");
}

#[test]
fn test_cli_exit_codes() {
    let home = Home::new();
    let status = |args: &[&str]| home.drks(args).status.code();

    assert_eq!(status(&[]), Some(1));
    assert_eq!(status(&["-q"]), Some(1));
    assert_eq!(status(&["killswitch"]), Some(1));
    assert_eq!(status(&["killswitch", "sideways"]), Some(1));
    assert_eq!(status(&["-q", "not_a_target"]), Some(1));
    assert_eq!(status(&["-q", "10.0.0.5"]), Some(1));
    assert_eq!(status(&["-q", "10.0.0.5", "tcp", "70000"]), Some(1));
    assert_eq!(status(&["-q", "10.0.0.5", "tcp", "443", "--dry-run"]), Some(1));
    assert_eq!(status(&["--help"]), Some(0));
    assert_eq!(status(&["--build-info"]), Some(0));
}
