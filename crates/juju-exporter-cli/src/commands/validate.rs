use std::path::Path;

use juju_exporter_core::validate;

use crate::runtime::RuntimeConfig;

pub fn run(runtime: &RuntimeConfig, options: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let raw = super::load_options(runtime, options)?;

    match validate(&raw) {
        Ok(settings) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("✓ configuration is valid");
                println!("  customer:    {}", settings.customer());
                println!("  cloud:       {}", settings.cloud_name());
                let endpoints: Vec<String> =
                    settings.controller_endpoints().iter().map(ToString::to_string).collect();
                println!("  controllers: {}", endpoints.join(", "));
                println!(
                    "  scrape:      port {} every {}m, timeout {}s",
                    settings.scrape_port(),
                    settings.scrape_interval_minutes(),
                    settings.scrape_timeout_seconds()
                );
                for warning in settings.warnings() {
                    println!("  warning:     {warning}");
                }
            }
            Ok(())
        }
        Err(errors) => {
            if json {
                let items: Vec<String> = errors.errors().iter().map(ToString::to_string).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for error in errors.errors() {
                    println!("✗ {error}");
                }
            }
            anyhow::bail!("{} configuration problem(s)", errors.len())
        }
    }
}
