//! StatusReconciler, the single entry point the event layer calls.
//!
//! Each call re-derives the unit status from scratch: nothing from a previous
//! pass is consulted except what the host itself reports.

use std::fmt;
use std::str::FromStr;

use juju_exporter_core::{
    install_channel, parse_controller_version, validate, UnitStatus, ValidatedSettings,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::error::{HostError, RenderError};
use crate::host::{AgentConf, Host, OpenedPort};
use crate::relations::RelationPublisher;
use crate::render::AgentConfigRenderer;

/// Message shown when everything is configured and running.
pub const READY_MESSAGE: &str = "Unit is ready";
pub const INACTIVE_MESSAGE: &str = "Exporter service is inactive. (See service logs in unit.)";

/// Longest cause text placed into an Error status.
const MAX_CAUSE_LEN: usize = 120;

/// Secrets shorter than this are only scrubbed where they stand as a whole
/// word; longer ones are scrubbed wherever they appear.
const MIN_INLINE_SECRET_LEN: usize = 8;

/// Events that trigger a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    Install,
    ConfigChanged,
    UpgradeCharm,
    ResourceAdded,
    LeaderElected,
    RelationJoined,
    RelationChanged,
    RelationDeparted,
    UpdateStatus,
}

impl Event {
    pub const ALL: [Event; 9] = [
        Event::Install,
        Event::ConfigChanged,
        Event::UpgradeCharm,
        Event::ResourceAdded,
        Event::LeaderElected,
        Event::RelationJoined,
        Event::RelationChanged,
        Event::RelationDeparted,
        Event::UpdateStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Event::Install => "install",
            Event::ConfigChanged => "config-changed",
            Event::UpgradeCharm => "upgrade-charm",
            Event::ResourceAdded => "resource-added",
            Event::LeaderElected => "leader-elected",
            Event::RelationJoined => "relation-joined",
            Event::RelationChanged => "relation-changed",
            Event::RelationDeparted => "relation-departed",
            Event::UpdateStatus => "update-status",
        }
    }

    pub fn is_relation_event(&self) -> bool {
        matches!(
            self,
            Event::RelationJoined | Event::RelationChanged | Event::RelationDeparted
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Event::ALL.iter().map(Event::name).collect();
                format!("unknown event '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Reconciliation step that can fail with an I/O-class error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Render,
    Restart,
    Ports,
    Publish,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Render => "render",
            Step::Restart => "restart",
            Step::Ports => "ports",
            Step::Publish => "publish",
        })
    }
}

struct StepFailure {
    step: Step,
    cause: String,
}

impl StepFailure {
    fn new(step: Step, cause: impl fmt::Display) -> Self {
        Self {
            step,
            cause: cause.to_string(),
        }
    }
}

impl From<RenderError> for StepFailure {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Restart(source) => StepFailure::new(Step::Restart, source),
            other => StepFailure::new(Step::Render, other),
        }
    }
}

/// Runs validation, rendering, port management and publishing in order and
/// folds the outcome into a [`UnitStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusReconciler {
    renderer: AgentConfigRenderer,
    publisher: RelationPublisher,
}

impl StatusReconciler {
    pub fn new(renderer: AgentConfigRenderer) -> Self {
        Self {
            renderer,
            publisher: RelationPublisher::new(),
        }
    }

    pub fn renderer(&self) -> &AgentConfigRenderer {
        &self.renderer
    }

    /// One full pass. Never fails: every error ends up in the status.
    pub fn reconcile(&self, event: Event, host: &mut dyn Host) -> UnitStatus {
        let span = info_span!("reconcile", %event);
        let _guard = span.enter();

        let status = self.derive(host);
        info!(state = %status.state, message = %status.message, "unit status");
        status
    }

    fn derive(&self, host: &mut dyn Host) -> UnitStatus {
        let settings = match validate(&host.config()) {
            Ok(settings) => settings,
            Err(errors) => return UnitStatus::blocked(errors.to_string()),
        };

        let agent_conf = host.agent_conf();
        if !host.collector_installed() {
            return UnitStatus::waiting(waiting_message(agent_conf.as_ref()));
        }

        let fallback_ca = agent_conf.as_ref().and_then(|c| c.cacert.as_deref());
        if let Err(failure) = self.apply(&settings, fallback_ca, host) {
            let cause = redact(&failure.cause, &settings.secret_values());
            warn!(step = %failure.step, cause = %cause, "reconciliation step failed");
            return UnitStatus::error(format!("{} failed: {}", failure.step, cause));
        }

        if !host.collector_running() {
            return UnitStatus::blocked(INACTIVE_MESSAGE);
        }
        UnitStatus::active(ready_message(&settings))
    }

    fn apply(
        &self,
        settings: &ValidatedSettings,
        fallback_ca: Option<&str>,
        host: &mut dyn Host,
    ) -> Result<(), StepFailure> {
        let outcome = self.renderer.apply(settings, fallback_ca, host)?;
        debug!(?outcome, "render step done");

        reconcile_ports(settings.scrape_port(), host).map_err(|e| StepFailure::new(Step::Ports, e))?;

        let relations = host.relations();
        let report = self
            .publisher
            .publish(Some(settings), &relations, host)
            .map_err(|e| StepFailure::new(Step::Publish, e))?;
        debug!(
            written = report.written,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "publish step done"
        );
        Ok(())
    }
}

/// Close every opened port other than the scrape port, then make sure the
/// scrape port is open.
fn reconcile_ports(port: u16, host: &mut dyn Host) -> Result<(), HostError> {
    let wanted = OpenedPort::tcp(port);
    let opened = host.opened_ports()?;
    for stale in opened.iter().filter(|p| **p != wanted) {
        host.close_port(stale)?;
        info!(port = %stale, "closed stale port");
    }
    if !opened.contains(&wanted) {
        host.open_port(&wanted)?;
        info!(port = %wanted, "opened scrape port");
    }
    Ok(())
}

fn waiting_message(agent_conf: Option<&AgentConf>) -> String {
    let Some(raw_version) = agent_conf.and_then(|c| c.upgraded_to_version.as_deref()) else {
        return "Waiting for the collector resource".to_string();
    };
    match parse_controller_version(raw_version).and_then(|v| install_channel(&v)) {
        Ok(channel) => format!("Waiting for the collector resource (channel {channel})"),
        Err(unsupported) => format!("Waiting for the collector resource: {unsupported}"),
    }
}

fn ready_message(settings: &ValidatedSettings) -> String {
    let warnings = settings.warnings();
    if warnings.is_empty() {
        return READY_MESSAGE.to_string();
    }
    let joined: Vec<String> = warnings.iter().map(ToString::to_string).collect();
    format!("{READY_MESSAGE} (warning: {})", joined.join("; "))
}

/// Scrub secret values, flatten to one line, and cap the length.
fn redact(cause: &str, secrets: &[String]) -> String {
    let mut text = cause.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        text = scrub(&text, secret);
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() <= MAX_CAUSE_LEN {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_CAUSE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

fn scrub(text: &str, secret: &str) -> String {
    let whole_word_only = secret.chars().count() < MIN_INLINE_SECRET_LEN;
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(secret) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + secret.len()..];
        let bounded = !out.chars().next_back().is_some_and(char::is_alphanumeric)
            && !after.chars().next().is_some_and(char::is_alphanumeric);
        if whole_word_only && !bounded {
            out.push_str(secret);
        } else {
            out.push_str("***");
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_round_trip() {
        for event in Event::ALL {
            assert_eq!(event.name().parse::<Event>().unwrap(), event);
        }
        assert!("config_changed".parse::<Event>().is_err());
        assert!(Event::RelationDeparted.is_relation_event());
        assert!(!Event::ConfigChanged.is_relation_event());
    }

    #[test]
    fn test_redact_scrubs_and_truncates() {
        let secrets = vec!["hunter2".to_string()];
        assert_eq!(redact("bad password hunter2\nagain", &secrets), "bad password *** again");

        let secrets = vec!["correct-horse-battery".to_string()];
        assert_eq!(redact("token=xcorrect-horse-batteryx", &secrets), "token=x***x");

        let long = "x".repeat(500);
        let out = redact(&long, &[]);
        assert_eq!(out.chars().count(), MAX_CAUSE_LEN);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_redact_short_secret_only_as_whole_word() {
        let secrets = vec!["p".to_string()];
        assert_eq!(redact("snap busy", &secrets), "snap busy");
        assert_eq!(redact("login p rejected", &secrets), "login *** rejected");
        assert_eq!(redact("password=p", &secrets), "password=***");

        let secrets = vec!["pw1".to_string()];
        assert_eq!(redact("pw1 pw1,pw1x", &secrets), "*** ***,pw1x");
    }

    #[test]
    fn test_waiting_message_variants() {
        assert_eq!(waiting_message(None), "Waiting for the collector resource");

        let conf = AgentConf {
            upgraded_to_version: Some("2.9.44.1".to_string()),
            cacert: None,
        };
        assert_eq!(
            waiting_message(Some(&conf)),
            "Waiting for the collector resource (channel 2.9/stable)"
        );

        let conf = AgentConf {
            upgraded_to_version: Some("3.0.2".to_string()),
            cacert: None,
        };
        assert!(waiting_message(Some(&conf)).contains("3.0.2 is not supported"));
    }

    #[test]
    fn test_step_names() {
        assert_eq!(Step::Render.to_string(), "render");
        assert_eq!(Step::Ports.to_string(), "ports");
        let failure: StepFailure = RenderError::Restart(HostError::Refused("nope".into())).into();
        assert_eq!(failure.step, Step::Restart);
    }
}
