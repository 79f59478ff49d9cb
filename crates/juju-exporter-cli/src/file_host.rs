//! File- and exec-backed [`Host`] used by the binary.
//!
//! Relation bags, opened ports, leadership and the unit address persist in a
//! JSON state file between invocations; the collector is checked and
//! restarted through external commands.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use juju_exporter_core::RawConfig;
use juju_exporter_operator::{
    AgentConf, BagScope, DataBag, Host, HostError, OpenedPort, RelationHandle, UnitIdentity,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runtime::RuntimeConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationState {
    pub unit: DataBag,
    pub app: DataBag,
}

/// Everything persisted between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostState {
    pub leader: bool,
    pub address: Option<String>,
    /// Keyed by `endpoint:id`.
    pub relations: BTreeMap<String, RelationState>,
    pub ports: BTreeSet<OpenedPort>,
}

pub struct FileHost {
    runtime: RuntimeConfig,
    config: RawConfig,
    state_path: PathBuf,
    state: HostState,
}

impl FileHost {
    /// Load persisted state; a missing state file starts empty.
    pub fn open(runtime: RuntimeConfig, config: RawConfig) -> Result<Self, HostError> {
        let state_path = runtime.state_file();
        let state = match fs::read(&state_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| HostError::State {
                path: state_path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HostState::default(),
            Err(source) => {
                return Err(HostError::Io {
                    operation: "read state file",
                    source,
                });
            }
        };
        Ok(Self {
            runtime,
            config,
            state_path,
            state,
        })
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        &mut self.state
    }

    pub fn join_relation(&mut self, relation: &RelationHandle) {
        self.state.relations.entry(relation.to_string()).or_default();
    }

    pub fn depart_relation(&mut self, relation: &RelationHandle) {
        self.state.relations.remove(&relation.to_string());
    }

    /// Persist state through a temp file and rename.
    pub fn save(&self) -> Result<(), HostError> {
        let io = |operation| move |source| HostError::Io { operation, source };
        let json = serde_json::to_vec_pretty(&self.state).map_err(|source| HostError::State {
            path: self.state_path.clone(),
            source,
        })?;
        if let Some(dir) = self.state_path.parent() {
            fs::create_dir_all(dir).map_err(io("create state directory"))?;
        }
        let tmp = self.state_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io("write state file"))?;
        fs::rename(&tmp, &self.state_path).map_err(io("replace state file"))?;
        Ok(())
    }

    fn relation_mut(&mut self, relation: &RelationHandle) -> Result<&mut RelationState, HostError> {
        self.state
            .relations
            .get_mut(&relation.to_string())
            .ok_or_else(|| HostError::UnknownRelation(relation.to_string()))
    }
}

fn run(argv: &[String]) -> Result<(), HostError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| HostError::Refused("no command configured".to_string()))?;
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| HostError::Io {
            operation: "spawn command",
            source,
        })?;
    if !status.success() {
        return Err(HostError::Command {
            command: argv.join(" "),
            status: status.to_string(),
        });
    }
    Ok(())
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

impl Host for FileHost {
    fn config(&self) -> RawConfig {
        self.config.clone()
    }

    fn identity(&self) -> UnitIdentity {
        self.runtime.identity()
    }

    fn is_leader(&self) -> bool {
        self.state.leader
    }

    fn unit_address(&self) -> Option<String> {
        self.state.address.clone()
    }

    fn relations(&self) -> Vec<RelationHandle> {
        self.state
            .relations
            .keys()
            .filter_map(|key| match RelationHandle::parse(key) {
                Ok(handle) => Some(handle),
                Err(reason) => {
                    warn!(%reason, "ignoring malformed relation key in state file");
                    None
                }
            })
            .collect()
    }

    fn relation_data(&self, relation: &RelationHandle, scope: BagScope) -> Result<DataBag, HostError> {
        let bags = self
            .state
            .relations
            .get(&relation.to_string())
            .ok_or_else(|| HostError::UnknownRelation(relation.to_string()))?;
        Ok(match scope {
            BagScope::Unit => bags.unit.clone(),
            BagScope::App => bags.app.clone(),
        })
    }

    fn set_relation_data(
        &mut self,
        relation: &RelationHandle,
        scope: BagScope,
        data: DataBag,
    ) -> Result<(), HostError> {
        let bags = self.relation_mut(relation)?;
        match scope {
            BagScope::Unit => bags.unit = data,
            BagScope::App => bags.app = data,
        }
        self.save()
    }

    fn collector_installed(&self) -> bool {
        let present = non_empty_file(&self.runtime.resource_path);
        debug!(path = %self.runtime.resource_path.display(), present, "collector resource");
        present
    }

    fn collector_running(&self) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", self.runtime.service_name.as_str()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn restart_collector(&mut self) -> Result<(), HostError> {
        run(&self.runtime.restart_command)
    }

    fn opened_ports(&self) -> Result<Vec<OpenedPort>, HostError> {
        Ok(self.state.ports.iter().cloned().collect())
    }

    fn open_port(&mut self, port: &OpenedPort) -> Result<(), HostError> {
        self.state.ports.insert(port.clone());
        self.save()
    }

    fn close_port(&mut self, port: &OpenedPort) -> Result<(), HostError> {
        self.state.ports.remove(port);
        self.save()
    }

    fn agent_conf(&self) -> Option<AgentConf> {
        let path = self.runtime.agent_conf_path()?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "agent.conf not readable");
                return None;
            }
        };
        match AgentConf::from_yaml_str(&content) {
            Ok(conf) => Some(conf),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "agent.conf is not valid YAML");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(dir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            state_dir: dir.join("state"),
            resource_path: dir.join("exporter.snap"),
            agent_conf_path: Some(dir.join("agent.conf")),
            restart_command: vec!["true".to_string()],
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_state_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let rel = RelationHandle::new("prometheus-scrape", 4);

        let mut host = FileHost::open(runtime(dir.path()), RawConfig::new()).unwrap();
        host.state_mut().leader = true;
        host.join_relation(&rel);
        let bag = DataBag::from([("port".to_string(), "5000".to_string())]);
        host.set_relation_data(&rel, BagScope::Unit, bag.clone()).unwrap();
        host.open_port(&OpenedPort::tcp(5000)).unwrap();

        let host = FileHost::open(runtime(dir.path()), RawConfig::new()).unwrap();
        assert!(host.is_leader());
        assert_eq!(host.relations(), vec![rel.clone()]);
        assert_eq!(host.relation_data(&rel, BagScope::Unit).unwrap(), bag);
        assert_eq!(host.opened_ports().unwrap(), vec![OpenedPort::tcp(5000)]);
    }

    #[test]
    fn test_empty_resource_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileHost::open(runtime(dir.path()), RawConfig::new()).unwrap();
        assert!(!host.collector_installed());

        fs::write(dir.path().join("exporter.snap"), b"").unwrap();
        assert!(!host.collector_installed());

        fs::write(dir.path().join("exporter.snap"), b"hsqs").unwrap();
        assert!(host.collector_installed());
    }

    #[test]
    fn test_agent_conf_missing_or_invalid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileHost::open(runtime(dir.path()), RawConfig::new()).unwrap();
        assert_eq!(host.agent_conf(), None);

        fs::write(dir.path().join("agent.conf"), "cacert: [unclosed").unwrap();
        assert_eq!(host.agent_conf(), None);

        fs::write(dir.path().join("agent.conf"), "upgradedToVersion: 2.9.42\n").unwrap();
        assert_eq!(
            host.agent_conf().unwrap().upgraded_to_version.as_deref(),
            Some("2.9.42")
        );
    }

    #[test]
    fn test_corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(dir.path().join("state/state.json"), b"{not json").unwrap();
        assert!(matches!(
            FileHost::open(runtime(dir.path()), RawConfig::new()),
            Err(HostError::State { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_command_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = FileHost::open(runtime(dir.path()), RawConfig::new()).unwrap();
        assert!(host.restart_collector().is_ok());

        let mut failing = runtime(dir.path());
        failing.restart_command = vec!["false".to_string()];
        let mut host = FileHost::open(failing, RawConfig::new()).unwrap();
        assert!(matches!(host.restart_collector(), Err(HostError::Command { .. })));
    }
}
