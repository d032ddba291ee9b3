//! Privilege elevation for backend commands
//!
//! The kill switch mutates the host firewall, which needs root. DRKS can run
//! as an unprivileged user and wraps each backend invocation
//! (`firewall-cmd`, `iptables`, `ip6tables`) in an elevation helper instead
//! of raising its own privileges.
//!
//! # Elevation Strategy
//!
//! - **Root**: commands run directly
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **Non-interactive fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `DRKS_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//!   Useful for scripts with sudoers NOPASSWD rules.
//!   Example: `DRKS_ELEVATION_METHOD=sudo drks killswitch on`
//!
//! - `DRKS_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Arguments are passed as argv entries, never through a shell
//! - Targets and ports are validated by the CLI before elevation
//! - Elevation helpers are checked for availability

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `DRKS_ELEVATION_METHOD`
    #[error("Invalid DRKS_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped<S: AsRef<OsStr>>(helper: &str, program: &Path, args: &[S]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program).args(args);
    cmd
}

fn direct<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds a command running `program` with root privileges.
///
/// # Errors
///
/// Returns `Err` if the requested or detected elevation helper is missing,
/// or `DRKS_ELEVATION_METHOD` holds an unknown value.
pub fn create_elevated_backend_command<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("DRKS_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    // 2. Direct Root Execution (No prompt needed)
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 3. Explicit elevation method override
    if let Ok(method) = std::env::var("DRKS_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    Ok(wrapped(&method, program, args))
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0, fallback to sudo/pkexec
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        assert!(!binary_exists("drks_nonexistent_binary_xyz"));
    }

    #[tokio::test]
    async fn test_test_mode_runs_program_directly() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("DRKS_TEST_NO_ELEVATION", "1");
        }

        let cmd =
            create_elevated_backend_command(Path::new("firewall-cmd"), &["-q", "--reload"]).unwrap();
        assert_eq!(cmd.as_std().get_program(), OsStr::new("firewall-cmd"));
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, [OsStr::new("-q"), OsStr::new("--reload")]);
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::remove_var("DRKS_TEST_NO_ELEVATION");
            std::env::set_var("DRKS_ELEVATION_METHOD", "invalid_method");
        }

        let result = create_elevated_backend_command(Path::new("iptables"), &["-F", "drks_conn"]);

        unsafe {
            std::env::set_var("DRKS_TEST_NO_ELEVATION", "1");
            std::env::remove_var("DRKS_ELEVATION_METHOD");
        }

        // Running the suite as root skips elevation entirely
        if nix::unistd::getuid().is_root() {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(ElevationError::InvalidMethod(_))));
        }
    }

    #[test]
    fn test_elevation_method_case_insensitive() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::remove_var("DRKS_TEST_NO_ELEVATION");
            std::env::set_var("DRKS_ELEVATION_METHOD", "SUDO");
        }

        let result = create_elevated_backend_command(Path::new("iptables"), &["-F", "drks_conn"]);

        unsafe {
            std::env::set_var("DRKS_TEST_NO_ELEVATION", "1");
            std::env::remove_var("DRKS_ELEVATION_METHOD");
        }

        // Either sudo exists or it is reported missing, but never rejected as invalid
        assert!(!matches!(result, Err(ElevationError::InvalidMethod(_))));
    }
}
