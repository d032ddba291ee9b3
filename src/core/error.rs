use thiserror::Error;

/// Core error types for DRKS
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend command exited unsuccessfully or could not be spawned
    #[error("backend error: {message}")]
    Backend {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Another drks process holds the operation lock
    #[error("another drks operation is in progress (lock held on {0})")]
    Locked(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known firewall-cmd / iptables failure messages and their translations
pub struct BackendErrorPattern;

impl BackendErrorPattern {
    /// Matches backend stderr against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
            || lower.contains("authorization failed")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run drks as root or allow sudo/run0/pkexec elevation")
                .with_suggestion("Force a method with DRKS_ELEVATION_METHOD=sudo")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        // Missing backend binary
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("Firewall backend is not installed or not found in PATH")
                .with_suggestion("Install firewalld: sudo dnf install firewalld  (Fedora/RHEL)")
                .with_suggestion("Or: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or select the other backend with --backend");
        }

        // firewalld daemon down
        if lower.contains("firewalld is not running") || lower.contains("not_running") {
            return ErrorTranslation::new("firewalld is not running")
                .with_suggestion("Start it: sudo systemctl start firewalld")
                .with_suggestion("Or use the iptables backend: drks --backend iptables");
        }

        // xtables lock contention
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Another process is modifying iptables")
                .with_suggestion("Wait a moment and try again")
                .with_suggestion(
                    "Check for conflicting firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // Chain already exists (harmless during setup)
        if lower.contains("already exists") || lower.contains("already_enabled") {
            return ErrorTranslation::new("Chain or rule already exists")
                .with_suggestion("This is expected when re-running setup")
                .with_suggestion("Run 'drks killswitch teardown' first for a clean slate");
        }

        // Missing chain / rule (harmless during off and close)
        if lower.contains("no chain/target/match")
            || lower.contains("does a matching rule exist")
            || lower.contains("not_enabled")
            || lower.contains("invalid_chain")
        {
            return ErrorTranslation::new("Chain or rule not found")
                .with_suggestion("The kill switch may not have been set up yet")
                .with_suggestion("Run 'drks killswitch setup' first");
        }

        // Chain still referenced
        if lower.contains("too many links") || lower.contains("directory not empty") {
            return ErrorTranslation::new("Chain is still referenced or not empty")
                .with_suggestion("Turn the kill switch off before tearing it down")
                .with_suggestion("Run 'drks killswitch teardown', which unlinks first");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Re-run with --verbose to see every backend invocation")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
