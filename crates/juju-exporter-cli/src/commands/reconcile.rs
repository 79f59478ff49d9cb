use std::path::PathBuf;

use anyhow::Context;
use juju_exporter_operator::{AgentConfigRenderer, Event, RelationHandle, StatusReconciler};
use tracing::info;

use crate::file_host::FileHost;
use crate::runtime::RuntimeConfig;

pub struct Invocation {
    pub event: Event,
    pub options: Option<PathBuf>,
    pub relation: Option<RelationHandle>,
    pub address: Option<String>,
    pub leader: Option<bool>,
    pub json: bool,
}

pub fn run(runtime: RuntimeConfig, invocation: Invocation) -> anyhow::Result<()> {
    let raw = super::load_options(&runtime, invocation.options.as_deref())?;
    let renderer = AgentConfigRenderer::new(runtime.agent_config_path.clone());
    let mut host = FileHost::open(runtime, raw).context("opening host state")?;

    apply_event(&mut host, &invocation)?;
    host.save().context("saving host state")?;

    let status = StatusReconciler::new(renderer).reconcile(invocation.event, &mut host);
    host.save().context("saving host state")?;

    if invocation.json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!("{status}");
    }
    Ok(())
}

/// Fold what the event tells us into persisted host state before the pass.
fn apply_event(host: &mut FileHost, invocation: &Invocation) -> anyhow::Result<()> {
    if let Some(address) = &invocation.address {
        host.state_mut().address = Some(address.clone());
    }
    if let Some(leader) = invocation.leader {
        host.state_mut().leader = leader;
    }
    if invocation.event == Event::LeaderElected {
        host.state_mut().leader = true;
    }

    if invocation.event.is_relation_event() {
        let relation = invocation
            .relation
            .as_ref()
            .with_context(|| format!("{} needs --relation endpoint:id", invocation.event))?;
        if invocation.event == Event::RelationDeparted {
            host.depart_relation(relation);
            info!(relation = %relation, "relation departed");
        } else {
            host.join_relation(relation);
        }
    }
    Ok(())
}
