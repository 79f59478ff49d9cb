//! Host capabilities: everything the reconciler needs from the surrounding
//! event layer, behind one trait.
//!
//! [`MemoryHost`] keeps all state in memory and counts writes and restarts,
//! which is what the scenario tests assert on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use juju_exporter_core::RawConfig;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// One relation data bag: flat string keys to string values.
pub type DataBag = BTreeMap<String, String>;

/// An established relation, identified by endpoint name and relation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationHandle {
    pub endpoint: String,
    pub id: u32,
}

impl RelationHandle {
    pub fn new(endpoint: impl Into<String>, id: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            id,
        }
    }

    /// Parse the `endpoint:id` form used on the command line and in state files.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (endpoint, id) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("'{raw}' is not in endpoint:id form"))?;
        if endpoint.is_empty() {
            return Err(format!("'{raw}' has an empty endpoint name"));
        }
        let id = id
            .parse()
            .map_err(|_| format!("'{raw}' has a non-numeric relation id"))?;
        Ok(Self::new(endpoint, id))
    }
}

impl fmt::Display for RelationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.id)
    }
}

/// Which side of a relation a bag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BagScope {
    /// Written by this unit, read by the remote application.
    Unit,
    /// Shared by the whole application; only the leader may write it.
    App,
}

/// Names this unit is known by inside its model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitIdentity {
    pub unit: String,
    pub application: String,
    pub model: String,
    pub model_uuid: String,
}

/// The fields of the machine agent's `agent.conf` the operator cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConf {
    #[serde(rename = "upgradedToVersion", default)]
    pub upgraded_to_version: Option<String>,
    #[serde(default)]
    pub cacert: Option<String>,
}

impl AgentConf {
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}

/// A port opened on the unit's machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpenedPort {
    pub port: u16,
    pub protocol: String,
}

impl OpenedPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: "tcp".to_string(),
        }
    }
}

impl fmt::Display for OpenedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Capabilities the reconciler consumes.
///
/// Reads never fail: a host that cannot answer reports "not present".
/// Mutations return [`HostError`] so the reconciler can name the failing step.
pub trait Host {
    /// Current operator-supplied option values.
    fn config(&self) -> RawConfig;

    fn identity(&self) -> UnitIdentity;

    fn is_leader(&self) -> bool;

    /// Address other applications should scrape, if one is known yet.
    fn unit_address(&self) -> Option<String>;

    /// Relations currently established, in a stable order.
    fn relations(&self) -> Vec<RelationHandle>;

    fn relation_data(&self, relation: &RelationHandle, scope: BagScope) -> Result<DataBag, HostError>;

    /// Replace the whole bag.
    fn set_relation_data(
        &mut self,
        relation: &RelationHandle,
        scope: BagScope,
        data: DataBag,
    ) -> Result<(), HostError>;

    /// Whether the collector package resource is present and usable.
    fn collector_installed(&self) -> bool;

    /// Whether the collector service is up.
    fn collector_running(&self) -> bool;

    fn restart_collector(&mut self) -> Result<(), HostError>;

    fn opened_ports(&self) -> Result<Vec<OpenedPort>, HostError>;

    fn open_port(&mut self, port: &OpenedPort) -> Result<(), HostError>;

    fn close_port(&mut self, port: &OpenedPort) -> Result<(), HostError>;

    /// Machine agent configuration, when it can be read.
    fn agent_conf(&self) -> Option<AgentConf>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RelationBags {
    unit: DataBag,
    app: DataBag,
}

/// In-memory [`Host`] for tests and dry runs.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    pub config: RawConfig,
    pub identity: UnitIdentity,
    pub leader: bool,
    pub address: Option<String>,
    pub installed: bool,
    pub running: bool,
    pub agent_conf: Option<AgentConf>,
    /// Relation writes made through [`Host::set_relation_data`].
    pub relation_writes: usize,
    /// Successful restarts.
    pub restarts: usize,
    /// Number of upcoming restarts that fail before one succeeds.
    pub failing_restarts: usize,
    /// When set, relation writes fail with this message.
    pub refuse_relation_writes: Option<String>,
    relations: BTreeMap<RelationHandle, RelationBags>,
    ports: BTreeSet<OpenedPort>,
}

impl MemoryHost {
    pub fn new(config: RawConfig) -> Self {
        Self {
            config,
            identity: UnitIdentity {
                unit: "juju-exporter/0".to_string(),
                application: "juju-exporter".to_string(),
                model: "lma".to_string(),
                model_uuid: "00000000-0000-4000-8000-000000000000".to_string(),
            },
            leader: true,
            address: Some("10.1.2.3".to_string()),
            installed: true,
            running: true,
            agent_conf: None,
            relation_writes: 0,
            restarts: 0,
            failing_restarts: 0,
            refuse_relation_writes: None,
            relations: BTreeMap::new(),
            ports: BTreeSet::new(),
        }
    }

    /// Establish a relation with empty bags.
    pub fn add_relation(&mut self, endpoint: &str, id: u32) -> RelationHandle {
        let handle = RelationHandle::new(endpoint, id);
        self.relations.entry(handle.clone()).or_default();
        handle
    }

    pub fn remove_relation(&mut self, relation: &RelationHandle) {
        self.relations.remove(relation);
    }

    /// Bag contents, empty when the relation or bag is unknown.
    pub fn bag(&self, relation: &RelationHandle, scope: BagScope) -> DataBag {
        self.relations
            .get(relation)
            .map(|bags| match scope {
                BagScope::Unit => bags.unit.clone(),
                BagScope::App => bags.app.clone(),
            })
            .unwrap_or_default()
    }

    pub fn ports(&self) -> Vec<OpenedPort> {
        self.ports.iter().cloned().collect()
    }
}

impl Host for MemoryHost {
    fn config(&self) -> RawConfig {
        self.config.clone()
    }

    fn identity(&self) -> UnitIdentity {
        self.identity.clone()
    }

    fn is_leader(&self) -> bool {
        self.leader
    }

    fn unit_address(&self) -> Option<String> {
        self.address.clone()
    }

    fn relations(&self) -> Vec<RelationHandle> {
        self.relations.keys().cloned().collect()
    }

    fn relation_data(&self, relation: &RelationHandle, scope: BagScope) -> Result<DataBag, HostError> {
        if !self.relations.contains_key(relation) {
            return Err(HostError::UnknownRelation(relation.to_string()));
        }
        Ok(self.bag(relation, scope))
    }

    fn set_relation_data(
        &mut self,
        relation: &RelationHandle,
        scope: BagScope,
        data: DataBag,
    ) -> Result<(), HostError> {
        if let Some(reason) = &self.refuse_relation_writes {
            return Err(HostError::Refused(reason.clone()));
        }
        let bags = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| HostError::UnknownRelation(relation.to_string()))?;
        match scope {
            BagScope::Unit => bags.unit = data,
            BagScope::App => bags.app = data,
        }
        self.relation_writes += 1;
        Ok(())
    }

    fn collector_installed(&self) -> bool {
        self.installed
    }

    fn collector_running(&self) -> bool {
        self.running
    }

    fn restart_collector(&mut self) -> Result<(), HostError> {
        if self.failing_restarts > 0 {
            self.failing_restarts -= 1;
            return Err(HostError::Refused("collector service busy".to_string()));
        }
        self.restarts += 1;
        Ok(())
    }

    fn opened_ports(&self) -> Result<Vec<OpenedPort>, HostError> {
        Ok(self.ports())
    }

    fn open_port(&mut self, port: &OpenedPort) -> Result<(), HostError> {
        self.ports.insert(port.clone());
        Ok(())
    }

    fn close_port(&mut self, port: &OpenedPort) -> Result<(), HostError> {
        self.ports.remove(port);
        Ok(())
    }

    fn agent_conf(&self) -> Option<AgentConf> {
        self.agent_conf.clone()
    }
}
