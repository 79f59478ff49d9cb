//! Operator runtime settings (runtime.toml).

use std::path::{Path, PathBuf};

use anyhow::Context;
use juju_exporter_operator::{UnitIdentity, DEFAULT_AGENT_CONFIG_PATH};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RUNTIME_CONFIG: &str = "/etc/juju-exporter-operator/runtime.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Where the collector config is rendered.
    pub agent_config_path: PathBuf,
    /// Unit options file (YAML, or TOML by extension).
    pub options_path: PathBuf,
    /// Relation bags, ports and leadership between invocations.
    pub state_dir: PathBuf,
    /// Attached collector package resource.
    pub resource_path: PathBuf,
    /// Controller `agent.conf`. Derived from `JUJU_CHARM_DIR` when unset.
    pub agent_conf_path: Option<PathBuf>,
    pub service_name: String,
    pub restart_command: Vec<String>,
    pub unit: UnitSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSection {
    pub name: String,
    pub model: String,
    pub model_uuid: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_config_path: PathBuf::from(DEFAULT_AGENT_CONFIG_PATH),
            options_path: PathBuf::from("/var/lib/juju-exporter-operator/options.yaml"),
            state_dir: PathBuf::from("/var/lib/juju-exporter-operator"),
            resource_path: PathBuf::from("/var/lib/juju-exporter-operator/resources/exporter-snap"),
            agent_conf_path: None,
            service_name: "snap.prometheus-juju-exporter.prometheus-juju-exporter.service".to_string(),
            restart_command: vec![
                "snap".to_string(),
                "restart".to_string(),
                "prometheus-juju-exporter".to_string(),
            ],
            unit: UnitSection::default(),
        }
    }
}

impl Default for UnitSection {
    fn default() -> Self {
        Self {
            name: "prometheus-juju-exporter/0".to_string(),
            model: "default".to_string(),
            model_uuid: String::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load an explicit file, or the default location when it exists, or
    /// fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_RUNTIME_CONFIG);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing runtime config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Unit identity, preferring the hook environment over the file.
    pub fn identity(&self) -> UnitIdentity {
        let unit = std::env::var("JUJU_UNIT_NAME").unwrap_or_else(|_| self.unit.name.clone());
        let application = unit.split('/').next().unwrap_or(&unit).to_string();
        UnitIdentity {
            application,
            model: std::env::var("JUJU_MODEL_NAME").unwrap_or_else(|_| self.unit.model.clone()),
            model_uuid: std::env::var("JUJU_MODEL_UUID").unwrap_or_else(|_| self.unit.model_uuid.clone()),
            unit,
        }
    }

    /// `agent.conf` sits one level above the charm directory.
    pub fn agent_conf_path(&self) -> Option<PathBuf> {
        self.agent_conf_path.clone().or_else(|| {
            std::env::var_os("JUJU_CHARM_DIR").map(|dir| PathBuf::from(dir).join("../agent.conf"))
        })
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }
}
