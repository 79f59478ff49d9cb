pub mod channel;
pub mod reconcile;
pub mod render;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use juju_exporter_core::RawConfig;

use crate::runtime::RuntimeConfig;

/// Read the options file given on the command line, or the runtime default.
pub fn load_options(runtime: &RuntimeConfig, explicit: Option<&Path>) -> anyhow::Result<RawConfig> {
    let path = explicit.unwrap_or(&runtime.options_path);
    RawConfig::from_file(path).with_context(|| format!("loading options from {}", path.display()))
}
