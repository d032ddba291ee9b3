//! Input validation for command line targets
//!
//! Every value reaching a backend invocation passes through here first. The
//! values end up as discrete argv entries, so validation is about rejecting
//! nonsense early rather than escaping.

use crate::core::command::Protocol;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Longest top level domain label accepted by [`validate_domain`]
const MAX_TLD_LEN: usize = 10;

/// What a positional target argument refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Ip(Ipv4Addr),
    Domain(String),
    Unrecognized,
}

/// Validates an IPv4 literal.
///
/// A `/32` suffix is accepted and dropped; any other prefix length is
/// rejected since exceptions are opened for single hosts only.
///
/// # Errors
///
/// Returns `Err` if the input is not a dotted IPv4 address.
///
/// # Examples
///
/// ```
/// use drks::validators::validate_ipv4_target;
///
/// assert_eq!(validate_ipv4_target("10.0.0.5/32").unwrap().to_string(), "10.0.0.5");
/// assert!(validate_ipv4_target("10.0.0.0/8").is_err());
/// ```
pub fn validate_ipv4_target(input: &str) -> Result<Ipv4Addr, String> {
    let invalid = || format!("'{input}' is not an IPv4 address");
    let trimmed = input.trim();
    let network: Ipv4Network = trimmed.parse().map_err(|_| invalid())?;

    // Shorthand such as `10.1` is padded by the network parser
    let addr = trimmed.split_once('/').map_or(trimmed, |(addr, _)| addr);
    if addr.parse::<Ipv4Addr>().is_err() {
        return Err(invalid());
    }

    if network.prefix() != 32 {
        return Err(format!(
            "'{input}' is a network, only single addresses can be opened"
        ));
    }

    Ok(network.ip())
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validates a domain name.
///
/// Accepts word characters, dots and dashes followed by a final label of
/// 2 to 10 word characters (`[\w.-]+\.\w{2,10}`).
///
/// # Errors
///
/// Returns `Err` if the input does not look like a domain name.
pub fn validate_domain(input: &str) -> Result<String, String> {
    let invalid = || format!("'{input}' is not a domain name");

    let (name, tld) = input.rsplit_once('.').ok_or_else(invalid)?;

    if name.is_empty()
        || !name
            .chars()
            .all(|c| is_word_char(c) || matches!(c, '.' | '-'))
    {
        return Err(invalid());
    }

    if !(2..=MAX_TLD_LEN).contains(&tld.len()) || !tld.chars().all(is_word_char) {
        return Err(invalid());
    }

    Ok(input.to_string())
}

/// Validates a transport protocol for `open_by_ip`.
///
/// # Errors
///
/// Returns `Err` for anything but `tcp` or `udp`.
pub fn validate_protocol(input: &str) -> Result<Protocol, String> {
    match input.parse::<Protocol>() {
        Ok(protocol @ (Protocol::Tcp | Protocol::Udp)) => Ok(protocol),
        _ => Err(format!("Protocol must be tcp or udp, got '{input}'")),
    }
}

/// Validates a port number given as text.
///
/// # Errors
///
/// Returns `Err` if the input is not a number between 1 and 65535.
pub fn validate_port(input: &str) -> Result<u16, String> {
    match input.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("Port must be between 1 and 65535, got '{input}'")),
        Ok(port) => Ok(port),
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Decides whether a positional target is an IPv4 address or a domain.
///
/// Addresses are checked first: `1.2.3.45` also matches the domain shape.
pub fn classify_target(input: &str) -> TargetKind {
    if let Ok(ip) = validate_ipv4_target(input) {
        return TargetKind::Ip(ip);
    }
    match validate_domain(input) {
        Ok(domain) => TargetKind::Domain(domain),
        Err(_) => TargetKind::Unrecognized,
    }
}
