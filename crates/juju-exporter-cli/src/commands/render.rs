use std::path::Path;

use juju_exporter_core::validate;
use juju_exporter_operator::{AgentConf, AgentConfigRenderer, RenderOutcome};

use crate::runtime::RuntimeConfig;

pub fn run(runtime: &RuntimeConfig, options: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let raw = super::load_options(runtime, options)?;
    let settings = validate(&raw)?;

    let fallback_ca = runtime
        .agent_conf_path()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| AgentConf::from_yaml_str(&content).ok())
        .and_then(|conf| conf.cacert);

    let renderer = AgentConfigRenderer::new(output.unwrap_or(&runtime.agent_config_path));
    match renderer.render(&settings, fallback_ca.as_deref())? {
        RenderOutcome::Written => println!("✓ wrote {}", renderer.path().display()),
        RenderOutcome::Unchanged => println!("✓ {} already up to date", renderer.path().display()),
    }
    Ok(())
}
