//! Relation publishing. Computes the outbound payload per relation interface
//! and writes each data bag only when its content changed.
//!
//! The three interfaces differ only in data shape, so they are variants of
//! one enum selected by endpoint name.

use std::collections::BTreeMap;

use juju_exporter_core::ValidatedSettings;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{HostError, PublishError};
use crate::host::{BagScope, DataBag, Host, RelationHandle, UnitIdentity};

pub const LEGACY_SCRAPE_ENDPOINT: &str = "prometheus-scrape";
pub const K8S_SCRAPE_ENDPOINT: &str = "prometheus-k8s-scrape";
pub const DASHBOARD_ENDPOINT: &str = "grafana-k8s-dashboard";

pub const METRICS_PATH: &str = "/metrics";

const CHARM_NAME: &str = "prometheus-juju-exporter";
const DASHBOARD_TEMPLATE_KEY: &str = "file:juju-exporter.json";
const DASHBOARD_CONTENT: &str = include_str!("../dashboards/juju-exporter.json");
/// Dashboards are tagged with the operator release that ships them.
pub const DASHBOARD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported relation interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationInterface {
    LegacyScrape,
    K8sScrape,
    Dashboard,
}

impl RelationInterface {
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        match endpoint {
            LEGACY_SCRAPE_ENDPOINT => Some(Self::LegacyScrape),
            K8S_SCRAPE_ENDPOINT => Some(Self::K8sScrape),
            DASHBOARD_ENDPOINT => Some(Self::Dashboard),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::LegacyScrape => LEGACY_SCRAPE_ENDPOINT,
            Self::K8sScrape => K8S_SCRAPE_ENDPOINT,
            Self::Dashboard => DASHBOARD_ENDPOINT,
        }
    }
}

/// Bags to publish on one relation. `None` leaves that bag alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationPayload {
    pub unit: Option<DataBag>,
    pub app: Option<DataBag>,
}

/// What one unit knows about itself when computing payloads.
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub identity: UnitIdentity,
    pub address: Option<String>,
}

#[derive(Serialize)]
struct ScrapeJob {
    metrics_path: &'static str,
    scrape_interval: String,
    scrape_timeout: String,
    static_configs: Vec<StaticConfig>,
}

#[derive(Serialize)]
struct StaticConfig {
    targets: Vec<String>,
}

#[derive(Serialize)]
struct ScrapeMetadata<'a> {
    model: &'a str,
    model_uuid: &'a str,
    application: &'a str,
    unit: &'a str,
}

#[derive(Serialize)]
struct DashboardTemplate {
    charm: &'static str,
    version: &'static str,
    content: &'static str,
    inject_dropdowns: bool,
}

#[derive(Serialize)]
struct Dashboards {
    templates: BTreeMap<&'static str, DashboardTemplate>,
    digest: String,
}

fn interval(settings: &ValidatedSettings) -> String {
    format!("{}s", settings.scrape_interval_seconds())
}

fn timeout(settings: &ValidatedSettings) -> String {
    format!("{}s", settings.scrape_timeout_seconds())
}

fn to_json<T: Serialize>(what: &'static str, value: &T) -> Result<String, PublishError> {
    serde_json::to_string(value).map_err(|source| PublishError::Encode { what, source })
}

/// Compute the payload for one interface. `Ok(None)` means the relation
/// cannot be served yet and should be skipped this pass.
pub fn payload(
    interface: RelationInterface,
    settings: &ValidatedSettings,
    ctx: &PublishContext,
) -> Result<Option<RelationPayload>, PublishError> {
    match interface {
        RelationInterface::LegacyScrape => {
            let Some(address) = &ctx.address else {
                return Ok(None);
            };
            let unit = DataBag::from([
                ("hostname".to_string(), address.clone()),
                ("port".to_string(), settings.scrape_port().to_string()),
                ("metrics_path".to_string(), METRICS_PATH.to_string()),
                ("scrape_interval".to_string(), interval(settings)),
                ("scrape_timeout".to_string(), timeout(settings)),
            ]);
            Ok(Some(RelationPayload {
                unit: Some(unit),
                app: None,
            }))
        }
        RelationInterface::K8sScrape => {
            let mut unit = DataBag::from([(
                "prometheus_scrape_unit_name".to_string(),
                ctx.identity.unit.clone(),
            )]);
            if let Some(address) = &ctx.address {
                unit.insert("prometheus_scrape_unit_address".to_string(), address.clone());
            }

            let jobs = [ScrapeJob {
                metrics_path: METRICS_PATH,
                scrape_interval: interval(settings),
                scrape_timeout: timeout(settings),
                static_configs: vec![StaticConfig {
                    targets: vec![format!("*:{}", settings.scrape_port())],
                }],
            }];
            let metadata = ScrapeMetadata {
                model: &ctx.identity.model,
                model_uuid: &ctx.identity.model_uuid,
                application: &ctx.identity.application,
                unit: &ctx.identity.unit,
            };
            let app = DataBag::from([
                ("scrape_jobs".to_string(), to_json("scrape jobs", &jobs)?),
                ("scrape_metadata".to_string(), to_json("scrape metadata", &metadata)?),
            ]);
            Ok(Some(RelationPayload {
                unit: Some(unit),
                app: Some(app),
            }))
        }
        RelationInterface::Dashboard => {
            let dashboards = Dashboards {
                templates: BTreeMap::from([(
                    DASHBOARD_TEMPLATE_KEY,
                    DashboardTemplate {
                        charm: CHARM_NAME,
                        version: DASHBOARD_VERSION,
                        content: DASHBOARD_CONTENT,
                        inject_dropdowns: false,
                    },
                )]),
                digest: hex::encode(Sha256::digest(DASHBOARD_CONTENT.as_bytes())),
            };
            let app = DataBag::from([("dashboards".to_string(), to_json("dashboards", &dashboards)?)]);
            Ok(Some(RelationPayload {
                unit: None,
                app: Some(app),
            }))
        }
    }
}

/// Counts from one publish pass, per bag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub written: usize,
    pub unchanged: usize,
    /// Relations not served this pass (unknown endpoint or no address yet).
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelationPublisher;

impl RelationPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Publish to every supported relation.
    ///
    /// With `settings == None` nothing is written, so data from the last
    /// successful pass stays in place.
    pub fn publish(
        &self,
        settings: Option<&ValidatedSettings>,
        relations: &[RelationHandle],
        host: &mut dyn Host,
    ) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport::default();
        let Some(settings) = settings else {
            debug!(relations = relations.len(), "no valid settings; relation data left as is");
            return Ok(report);
        };

        let ctx = PublishContext {
            identity: host.identity(),
            address: host.unit_address(),
        };
        let leader = host.is_leader();

        for relation in relations {
            let Some(interface) = RelationInterface::from_endpoint(&relation.endpoint) else {
                debug!(relation = %relation, "endpoint not published by this unit");
                report.skipped += 1;
                continue;
            };
            let Some(payload) = payload(interface, settings, &ctx)? else {
                warn!(relation = %relation, "unit address unknown; skipping scrape relation");
                report.skipped += 1;
                continue;
            };

            if let Some(bag) = payload.unit {
                write_bag(host, relation, BagScope::Unit, bag, &mut report)?;
            }
            if let Some(bag) = payload.app {
                if leader {
                    write_bag(host, relation, BagScope::App, bag, &mut report)?;
                } else {
                    debug!(relation = %relation, "not leader; application bag left to the leader");
                }
            }
        }

        Ok(report)
    }
}

fn write_bag(
    host: &mut dyn Host,
    relation: &RelationHandle,
    scope: BagScope,
    bag: DataBag,
    report: &mut PublishReport,
) -> Result<(), PublishError> {
    let wrap = |source: HostError| PublishError::Relation {
        relation: relation.to_string(),
        source,
    };

    let current = host.relation_data(relation, scope).map_err(wrap)?;
    if current == bag {
        debug!(relation = %relation, ?scope, "relation data unchanged");
        report.unchanged += 1;
        return Ok(());
    }

    host.set_relation_data(relation, scope, bag).map_err(wrap)?;
    info!(relation = %relation, ?scope, "relation data published");
    report.written += 1;
    Ok(())
}
