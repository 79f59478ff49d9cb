//! Unit options as supplied by the deployment tool.
//!
//! A [`RawConfig`] is replaced wholesale on every config-changed event. It is
//! untyped on purpose: every scalar arrives as a [`ConfigValue`] and only the
//! validator decides what a value means. [`OPTIONS`] is the declaration table,
//! and its order is the order in which validation errors are reported.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigFileError;

/// A single raw option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// Textual form of the value, as an operator would have typed it.
    pub fn to_text(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Str(s) => s.clone(),
        }
    }

    /// Integer view. Strings holding a decimal integer are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }

    /// Boolean view. Strings `true`/`false` (any case) are accepted.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            ConfigValue::Int(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

/// Declared default of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_value(self) -> ConfigValue {
        match self {
            DefaultValue::Bool(b) => ConfigValue::Bool(b),
            DefaultValue::Int(i) => ConfigValue::Int(i),
            DefaultValue::Str(s) => ConfigValue::Str(s.to_string()),
        }
    }
}

/// One entry of the option declaration table. The validator takes
/// `required` and `secret` from here.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub default: Option<DefaultValue>,
    /// Must be present and non-empty for the unit to leave `Blocked`.
    pub required: bool,
    /// Kept verbatim and never echoed in logs or status messages.
    pub secret: bool,
}

const fn optional(name: &'static str, default: DefaultValue) -> OptionSpec {
    OptionSpec {
        name,
        default: Some(default),
        required: false,
        secret: false,
    }
}

const fn required(name: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        default: None,
        required: true,
        secret: false,
    }
}

pub const DEBUG: &str = "debug";
pub const CUSTOMER: &str = "customer";
pub const CLOUD_NAME: &str = "cloud-name";
pub const CONTROLLER_URL: &str = "controller-url";
pub const CONTROLLER_CA_CERT: &str = "controller-ca-cert";
pub const JUJU_USER: &str = "juju-user";
pub const JUJU_PASSWORD: &str = "juju-password";
pub const VIRTUAL_MACS: &str = "virtual-macs";
pub const MATCH_INTERFACES: &str = "match-interfaces";
pub const SCRAPE_PORT: &str = "scrape-port";
pub const SCRAPE_INTERVAL: &str = "scrape-interval";
pub const SCRAPE_TIMEOUT: &str = "scrape-timeout";

/// MAC prefixes handed out by common hypervisors.
pub const DEFAULT_VIRTUAL_MACS: &str = "52:54:00,fa:16:3e,06:f1:3a,00:0d:3a,00:50:56";

/// Every option the unit understands, in declaration order.
pub const OPTIONS: &[OptionSpec] = &[
    optional(DEBUG, DefaultValue::Bool(false)),
    required(CUSTOMER),
    required(CLOUD_NAME),
    // Comma-separated host:port list.
    required(CONTROLLER_URL),
    // Base64 PEM; empty falls back to the machine agent's CA.
    optional(CONTROLLER_CA_CERT, DefaultValue::Str("")),
    required(JUJU_USER),
    OptionSpec {
        secret: true,
        ..required(JUJU_PASSWORD)
    },
    optional(VIRTUAL_MACS, DefaultValue::Str(DEFAULT_VIRTUAL_MACS)),
    // Empty matches every interface.
    optional(MATCH_INTERFACES, DefaultValue::Str("")),
    optional(SCRAPE_PORT, DefaultValue::Int(5000)),
    // Minutes.
    optional(SCRAPE_INTERVAL, DefaultValue::Int(15)),
    // Seconds.
    optional(SCRAPE_TIMEOUT, DefaultValue::Int(30)),
];

/// Look up an option declaration by name.
pub fn option_spec(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|o| o.name == name)
}

/// Position of an option in the declaration table.
pub fn declaration_index(name: &str) -> usize {
    OPTIONS
        .iter()
        .position(|o| o.name == name)
        .unwrap_or(OPTIONS.len())
}

/// Mapping from option name to raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawConfig(BTreeMap<String, ConfigValue>);

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config holding every declared default and nothing else.
    pub fn with_defaults() -> Self {
        let mut cfg = Self::new();
        for spec in OPTIONS {
            if let Some(default) = spec.default {
                cfg.set(spec.name, default.to_value());
            }
        }
        cfg
    }

    pub fn set(&mut self, name: &str, value: impl Into<ConfigValue>) -> &mut Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfigValue> {
        self.0.remove(name)
    }

    /// The explicitly supplied value, if any.
    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.0.get(name)
    }

    /// The supplied value, falling back to the declared default.
    pub fn effective(&self, name: &str) -> Option<ConfigValue> {
        self.0
            .get(name)
            .cloned()
            .or_else(|| option_spec(name).and_then(|s| s.default).map(DefaultValue::to_value))
    }

    /// Supplied keys that are not declared options.
    pub fn unknown_options(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter(|k| option_spec(k).is_none())
            .map(String::as_str)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse a flat YAML mapping. Null values count as absent.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigFileError> {
        let map: Option<BTreeMap<String, Option<ConfigValue>>> =
            serde_yaml::from_str(content).map_err(ConfigFileError::Yaml)?;
        Ok(Self::from_optional_map(map.unwrap_or_default()))
    }

    /// Parse a flat TOML table.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigFileError> {
        let map: BTreeMap<String, ConfigValue> =
            toml::from_str(content).map_err(ConfigFileError::Toml)?;
        Ok(Self(map))
    }

    /// Read an options file; `.toml` is parsed as TOML, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            _ => Self::from_yaml_str(&content)?,
        };
        for unknown in cfg.unknown_options() {
            tracing::warn!(option = %unknown, "ignoring undeclared option");
        }
        Ok(cfg)
    }

    fn from_optional_map(map: BTreeMap<String, Option<ConfigValue>>) -> Self {
        Self(
            map.into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for RawConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_optional_options() {
        let cfg = RawConfig::with_defaults();
        assert_eq!(cfg.get(SCRAPE_PORT), Some(&ConfigValue::Int(5000)));
        assert_eq!(cfg.get(SCRAPE_INTERVAL), Some(&ConfigValue::Int(15)));
        assert_eq!(cfg.get(SCRAPE_TIMEOUT), Some(&ConfigValue::Int(30)));
        assert!(cfg.get(CUSTOMER).is_none());
    }

    #[test]
    fn test_effective_falls_back_to_default() {
        let mut cfg = RawConfig::new();
        assert_eq!(cfg.effective(SCRAPE_PORT), Some(ConfigValue::Int(5000)));
        cfg.set(SCRAPE_PORT, 6000);
        assert_eq!(cfg.effective(SCRAPE_PORT), Some(ConfigValue::Int(6000)));
        assert_eq!(cfg.effective(CUSTOMER), None);
    }

    #[test]
    fn test_parse_yaml_options() {
        let yaml = r#"
customer: Acme
scrape-port: 5001
debug: true
juju-password:
"#;
        let cfg = RawConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.get(CUSTOMER), Some(&ConfigValue::Str("Acme".into())));
        assert_eq!(cfg.get(SCRAPE_PORT), Some(&ConfigValue::Int(5001)));
        assert_eq!(cfg.get(DEBUG), Some(&ConfigValue::Bool(true)));
        assert!(cfg.get(JUJU_PASSWORD).is_none());
    }

    #[test]
    fn test_parse_toml_options() {
        let toml_str = r#"
customer = "Acme"
"scrape-interval" = 5
"#;
        let cfg = RawConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(cfg.get(SCRAPE_INTERVAL).and_then(ConfigValue::as_int), Some(5));
    }

    #[test]
    fn test_empty_yaml_is_empty_config() {
        let cfg = RawConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg, RawConfig::new());
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.toml");
        std::fs::write(&path, "customer = \"Acme\"\n").unwrap();
        let cfg = RawConfig::from_file(&path).unwrap();
        assert_eq!(cfg.get(CUSTOMER).map(ConfigValue::to_text).as_deref(), Some("Acme"));
    }

    #[test]
    fn test_unknown_options_reported() {
        let cfg: RawConfig = [("customer", "Acme"), ("colour", "blue")].into_iter().collect();
        assert_eq!(cfg.unknown_options(), vec!["colour"]);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(ConfigValue::from(" 42 ").as_int(), Some(42));
        assert_eq!(ConfigValue::from("TRUE").as_bool(), Some(true));
        assert_eq!(ConfigValue::from(true).as_int(), None);
        assert_eq!(ConfigValue::from(7).to_text(), "7");
    }
}
