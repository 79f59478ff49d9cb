use juju_exporter_core::{install_channel, parse_controller_version};

pub fn run(version: &str) -> anyhow::Result<()> {
    let parsed = parse_controller_version(version)?;
    println!("{}", install_channel(&parsed)?);
    Ok(())
}
