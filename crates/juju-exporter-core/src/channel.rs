//! Collector install channel selection.
//!
//! The collector talks to the controller API, so its package channel has to
//! track the controller series the unit is deployed under.

use semver::Version;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Juju controller version {version} is not supported. \
     Supported versions are: 2.6, 2.7, 2.8, 2.9, 3.1, 3.2, 3.3, 3.4, 3.5"
)]
pub struct UnsupportedController {
    pub version: String,
}

/// Package channel matching a controller version.
pub fn install_channel(controller: &Version) -> Result<&'static str, UnsupportedController> {
    match (controller.major, controller.minor) {
        (2, 6..=8) => Ok("2.8/stable"),
        (2, 9) => Ok("2.9/stable"),
        (3, 1..=5) => Ok("3/stable"),
        _ => Err(UnsupportedController {
            version: controller.to_string(),
        }),
    }
}

/// Parse a controller version as written in `agent.conf`.
///
/// Juju writes versions such as `3.1.6` or `2.9.44.1`; anything past the
/// patch component is dropped.
pub fn parse_controller_version(raw: &str) -> Result<Version, UnsupportedController> {
    let unsupported = || UnsupportedController {
        version: raw.to_string(),
    };
    let mut parts = raw.trim().split(['.', '-']);
    let mut next = || -> Result<u64, UnsupportedController> {
        parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(unsupported)
    };
    let major = next()?;
    let minor = next()?;
    let patch = next().unwrap_or(0);
    Ok(Version::new(major, minor, patch))
}
