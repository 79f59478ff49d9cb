//! Validated settings and the value types they are built from.
//!
//! A [`ValidatedSettings`] only comes out of [`crate::validate`], so holding
//! one means every required option was present and every semantic check
//! passed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

/// Wrapper for values that must never show up in logs or status messages.
///
/// `Debug` and `Serialize` both print a placeholder.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<T> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

// Hostname labels, IPv4 dotted quads, or a bracketed IPv6 literal, then a port.
static HOST_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*):([0-9]{1,5})$",
    )
    .expect("host:port pattern is valid")
});

/// One controller API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ControllerEndpoint {
    /// Parse a strict `host:port` entry.
    pub fn parse(entry: &str) -> Result<Self, String> {
        let caps = HOST_PORT
            .captures(entry)
            .ok_or_else(|| format!("'{entry}' is not a host:port pair"))?;
        let host = caps[1].to_string();
        let port = caps[2]
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| format!("'{entry}' has a port outside 1-65535"))?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Serialize for ControllerEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A MAC address prefix, normalised to lowercase colon-separated octets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MacPrefix(String);

impl MacPrefix {
    /// Accepts `:`- or `-`-separated octets, or bare hex of even length, up to
    /// six octets.
    pub fn parse(token: &str) -> Result<Self, String> {
        let octets: Vec<&str> = if token.contains(':') || token.contains('-') {
            token.split([':', '-']).collect()
        } else if token.len() % 2 == 0 {
            (0..token.len())
                .step_by(2)
                .filter_map(|i| token.get(i..i + 2))
                .collect()
        } else {
            return Err(format!("'{token}' is not a MAC prefix"));
        };

        if octets.is_empty() || octets.len() > 6 {
            return Err(format!("'{token}' must have between 1 and 6 octets"));
        }
        for octet in &octets {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("'{token}' is not a MAC prefix"));
            }
        }

        Ok(Self(octets.join(":").to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interface selection pattern. `None` matches every interface.
#[derive(Debug, Clone, Default)]
pub struct InterfacePattern(Option<Regex>);

impl InterfacePattern {
    pub fn match_all() -> Self {
        Self(None)
    }

    /// Compile a pattern; an empty string means match-all.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self::match_all());
        }
        Regex::new(pattern).map(|re| Self(Some(re)))
    }

    pub fn is_match_all(&self) -> bool {
        self.0.is_none()
    }

    pub fn matches(&self, interface: &str) -> bool {
        self.0.as_ref().is_none_or(|re| re.is_match(interface))
    }

    /// Source text of the pattern, empty for match-all.
    pub fn as_str(&self) -> &str {
        self.0.as_ref().map(Regex::as_str).unwrap_or("")
    }
}

impl PartialEq for InterfacePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for InterfacePattern {}

impl Serialize for InterfacePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Non-fatal findings that do not block the unit but belong in its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    TimeoutNotShorterThanInterval { timeout_secs: u64, interval_secs: u64 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::TimeoutNotShorterThanInterval {
                timeout_secs,
                interval_secs,
            } => write!(
                f,
                "scrape-timeout {timeout_secs}s is not shorter than the scrape interval {interval_secs}s"
            ),
        }
    }
}

/// Fully validated unit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedSettings {
    pub(crate) debug: bool,
    pub(crate) customer: String,
    pub(crate) cloud_name: String,
    pub(crate) controller_endpoints: Vec<ControllerEndpoint>,
    pub(crate) controller_ca_cert: Option<Secret<Vec<u8>>>,
    pub(crate) juju_user: String,
    pub(crate) juju_password: Secret<String>,
    pub(crate) scrape_port: u16,
    pub(crate) scrape_interval_minutes: u32,
    pub(crate) scrape_timeout_seconds: u32,
    pub(crate) virtual_mac_prefixes: BTreeSet<MacPrefix>,
    pub(crate) match_interfaces_pattern: InterfacePattern,
}

impl ValidatedSettings {
    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    /// Controller endpoints in the order the operator listed them.
    pub fn controller_endpoints(&self) -> &[ControllerEndpoint] {
        &self.controller_endpoints
    }

    /// Decoded CA certificate, if one was configured explicitly.
    pub fn controller_ca_cert(&self) -> Option<&Secret<Vec<u8>>> {
        self.controller_ca_cert.as_ref()
    }

    pub fn juju_user(&self) -> &str {
        &self.juju_user
    }

    pub fn juju_password(&self) -> &Secret<String> {
        &self.juju_password
    }

    pub fn scrape_port(&self) -> u16 {
        self.scrape_port
    }

    pub fn scrape_interval_minutes(&self) -> u32 {
        self.scrape_interval_minutes
    }

    pub fn scrape_interval_seconds(&self) -> u64 {
        u64::from(self.scrape_interval_minutes) * 60
    }

    pub fn scrape_timeout_seconds(&self) -> u32 {
        self.scrape_timeout_seconds
    }

    pub fn virtual_mac_prefixes(&self) -> &BTreeSet<MacPrefix> {
        &self.virtual_mac_prefixes
    }

    pub fn match_interfaces_pattern(&self) -> &InterfacePattern {
        &self.match_interfaces_pattern
    }

    /// Findings that do not block the unit.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let timeout_secs = u64::from(self.scrape_timeout_seconds);
        let interval_secs = self.scrape_interval_seconds();
        if timeout_secs >= interval_secs {
            warnings.push(ConfigWarning::TimeoutNotShorterThanInterval {
                timeout_secs,
                interval_secs,
            });
        }
        warnings
    }

    /// Raw secret strings that must be scrubbed from any outbound text.
    pub fn secret_values(&self) -> Vec<String> {
        let mut values = vec![self.juju_password.expose().clone()];
        if let Some(cert) = &self.controller_ca_cert {
            values.push(String::from_utf8_lossy(cert.expose()).into_owned());
        }
        values.retain(|v| !v.is_empty());
        values
    }
}
