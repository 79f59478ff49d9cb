//! End-to-end reconciliation passes against the in-memory host.

use std::fs;

use juju_exporter_core::config::{self, RawConfig};
use juju_exporter_core::UnitState;
use juju_exporter_operator::relations::{DASHBOARD_ENDPOINT, K8S_SCRAPE_ENDPOINT, LEGACY_SCRAPE_ENDPOINT};
use juju_exporter_operator::{
    AgentConf, AgentConfigDocument, AgentConfigRenderer, BagScope, Event, Host, MemoryHost,
    OpenedPort, StatusReconciler,
};
use tempfile::TempDir;

const PASSWORD: &str = "correct-horse-battery";

fn valid_config() -> RawConfig {
    let mut raw = RawConfig::new();
    raw.set(config::CUSTOMER, "acme")
        .set(config::CLOUD_NAME, "prod-1")
        .set(config::CONTROLLER_URL, "10.0.0.3:17070,10.0.0.1:17070,10.0.0.2:17070")
        .set(config::JUJU_USER, "exporter")
        .set(config::JUJU_PASSWORD, PASSWORD);
    raw
}

struct Fixture {
    _dir: TempDir,
    reconciler: StatusReconciler,
    host: MemoryHost,
}

impl Fixture {
    fn new(config: RawConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("snap/current/config.yaml"));
        Self {
            _dir: dir,
            reconciler: StatusReconciler::new(renderer),
            host: MemoryHost::new(config),
        }
    }

    fn run(&mut self, event: Event) -> juju_exporter_core::UnitStatus {
        self.reconciler.reconcile(event, &mut self.host)
    }

    fn rendered(&self) -> Option<AgentConfigDocument> {
        let content = fs::read_to_string(self.reconciler.renderer().path()).ok()?;
        Some(AgentConfigDocument::from_yaml(&content).unwrap())
    }
}

#[test]
fn test_empty_customer_blocks_and_names_field() {
    let mut raw = valid_config();
    raw.set(config::CUSTOMER, "");
    let mut fx = Fixture::new(raw);

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Blocked);
    assert!(status.message.contains("customer"), "{}", status.message);
    assert!(fx.rendered().is_none());
    assert_eq!(fx.host.restarts, 0);
}

#[test]
fn test_missing_resource_waits() {
    let mut fx = Fixture::new(valid_config());
    fx.host.installed = false;

    let status = fx.run(Event::Install);
    assert_eq!(status.state, UnitState::Waiting);
    assert!(fx.rendered().is_none());
}

#[test]
fn test_waiting_message_names_install_channel() {
    let mut fx = Fixture::new(valid_config());
    fx.host.installed = false;
    fx.host.agent_conf = Some(AgentConf {
        upgraded_to_version: Some("3.1.6".to_string()),
        cacert: None,
    });

    let status = fx.run(Event::Install);
    assert_eq!(status.state, UnitState::Waiting);
    assert!(status.message.contains("3/stable"), "{}", status.message);
}

#[test]
fn test_valid_config_with_resource_is_active() {
    let mut fx = Fixture::new(valid_config());

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Active);
    assert_eq!(status.message, "Unit is ready");

    let doc = fx.rendered().unwrap();
    assert_eq!(
        doc.juju.controller_endpoint,
        vec!["10.0.0.3:17070", "10.0.0.1:17070", "10.0.0.2:17070"]
    );
    assert_eq!(doc.juju.password, PASSWORD);
    assert_eq!(fx.host.restarts, 1);
    assert_eq!(fx.host.ports(), vec![OpenedPort::tcp(5000)]);
}

#[test]
fn test_invalid_cert_blocks_independently() {
    let mut raw = valid_config();
    raw.set(config::CONTROLLER_CA_CERT, "not-base64!");
    let mut fx = Fixture::new(raw);

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Blocked);
    assert!(status.message.contains("controller-ca-cert"), "{}", status.message);
    assert!(!status.message.contains("customer"));
}

#[test]
fn test_repeated_passes_are_idempotent() {
    let mut fx = Fixture::new(valid_config());
    let rel = fx.host.add_relation(LEGACY_SCRAPE_ENDPOINT, 1);
    fx.host.add_relation(K8S_SCRAPE_ENDPOINT, 2);
    fx.host.add_relation(DASHBOARD_ENDPOINT, 3);

    fx.run(Event::RelationJoined);
    let writes = fx.host.relation_writes;
    assert_eq!(fx.host.bag(&rel, BagScope::Unit)["port"], "5000");

    let status = fx.run(Event::UpdateStatus);
    assert_eq!(status.state, UnitState::Active);
    assert_eq!(fx.host.relation_writes, writes);
    assert_eq!(fx.host.restarts, 1);
}

#[test]
fn test_config_edit_rerenders_and_republishes() {
    let mut fx = Fixture::new(valid_config());
    let rel = fx.host.add_relation(LEGACY_SCRAPE_ENDPOINT, 1);
    fx.run(Event::ConfigChanged);

    fx.host.config.set(config::SCRAPE_PORT, 9100);
    let status = fx.run(Event::ConfigChanged);

    assert_eq!(status.state, UnitState::Active);
    assert_eq!(fx.host.restarts, 2);
    assert_eq!(fx.rendered().unwrap().exporter.port, 9100);
    assert_eq!(fx.host.bag(&rel, BagScope::Unit)["port"], "9100");
    assert_eq!(fx.host.ports(), vec![OpenedPort::tcp(9100)]);
}

#[test]
fn test_invalid_edit_keeps_last_good_relation_data() {
    let mut fx = Fixture::new(valid_config());
    let rel = fx.host.add_relation(LEGACY_SCRAPE_ENDPOINT, 1);
    fx.run(Event::ConfigChanged);
    let published = fx.host.bag(&rel, BagScope::Unit);
    let rendered = fx.rendered();

    fx.host.config.set(config::SCRAPE_PORT, 0);
    let status = fx.run(Event::ConfigChanged);

    assert_eq!(status.state, UnitState::Blocked);
    assert!(status.message.contains("scrape-port"));
    assert_eq!(fx.host.bag(&rel, BagScope::Unit), published);
    assert_eq!(fx.rendered(), rendered);
}

#[test]
fn test_inactive_service_blocks() {
    let mut fx = Fixture::new(valid_config());
    fx.host.running = false;

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Blocked);
    assert_eq!(status.message, "Exporter service is inactive. (See service logs in unit.)");
}

#[test]
fn test_timeout_warning_surfaces_in_active_message() {
    let mut raw = valid_config();
    raw.set(config::SCRAPE_INTERVAL, 1).set(config::SCRAPE_TIMEOUT, 90);
    let mut fx = Fixture::new(raw);

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Active);
    assert!(status.message.starts_with("Unit is ready (warning:"), "{}", status.message);
}

#[test]
fn test_publish_failure_is_error_without_secrets() {
    let mut fx = Fixture::new(valid_config());
    fx.host.add_relation(LEGACY_SCRAPE_ENDPOINT, 1);
    fx.host.refuse_relation_writes = Some(format!("store rejected {PASSWORD}"));

    let status = fx.run(Event::RelationChanged);
    assert_eq!(status.state, UnitState::Error);
    assert!(status.message.starts_with("publish failed:"), "{}", status.message);
    assert!(!status.message.contains(PASSWORD));
}

#[test]
fn test_failed_restart_retried_on_next_pass() {
    let mut fx = Fixture::new(valid_config());
    fx.host.failing_restarts = 1;

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.state, UnitState::Error);
    assert_eq!(status.message, "restart failed: collector service busy");
    assert_eq!(fx.host.restarts, 0);

    let status = fx.run(Event::UpdateStatus);
    assert_eq!(status.state, UnitState::Active, "{}", status.message);
    assert_eq!(fx.host.restarts, 1);

    fx.run(Event::UpdateStatus);
    assert_eq!(fx.host.restarts, 1);
}

#[test]
fn test_short_password_does_not_garble_cause() {
    let mut raw = valid_config();
    raw.set(config::JUJU_PASSWORD, "s");
    let mut fx = Fixture::new(raw);
    fx.host.failing_restarts = 1;

    let status = fx.run(Event::ConfigChanged);
    assert_eq!(status.message, "restart failed: collector service busy");
}

#[test]
fn test_unwritable_render_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, b"").unwrap();
    let reconciler = StatusReconciler::new(AgentConfigRenderer::new(blocker.join("config.yaml")));
    let mut host = MemoryHost::new(valid_config());

    let status = reconciler.reconcile(Event::ConfigChanged, &mut host);
    assert_eq!(status.state, UnitState::Error);
    assert!(status.message.starts_with("render failed:"), "{}", status.message);
    assert!(status.message.len() <= "render failed: ".len() + 120);
}

#[test]
fn test_ca_falls_back_to_agent_conf() {
    let mut fx = Fixture::new(valid_config());
    fx.host.agent_conf = Some(AgentConf {
        upgraded_to_version: Some("3.1.6".to_string()),
        cacert: Some("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_string()),
    });

    fx.run(Event::ConfigChanged);
    let doc = fx.rendered().unwrap();
    assert!(doc.juju.controller_cacert.unwrap().contains("BEGIN CERTIFICATE"));
}

#[test]
fn test_stale_ports_closed() {
    let mut fx = Fixture::new(valid_config());
    fx.host.open_port(&OpenedPort::tcp(8080)).unwrap();

    fx.run(Event::UpgradeCharm);
    assert_eq!(fx.host.ports(), vec![OpenedPort::tcp(5000)]);
}
