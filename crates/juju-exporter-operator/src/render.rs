//! Agent config rendering. Turns validated settings into the collector's
//! YAML config file and installs it atomically.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use juju_exporter_core::ValidatedSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::RenderError;
use crate::host::Host;

/// Where the collector package reads its configuration.
pub const DEFAULT_AGENT_CONFIG_PATH: &str = "/var/snap/prometheus-juju-exporter/current/config.yaml";

/// The collector's configuration document.
///
/// Field names and nesting follow the collector's own schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfigDocument {
    pub debug: bool,
    pub customer: CustomerSection,
    pub juju: JujuSection,
    pub exporter: ExporterSection,
    pub detection: DetectionSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSection {
    pub name: String,
    pub cloud_name: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JujuSection {
    pub controller_endpoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_cacert: Option<String>,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for JujuSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JujuSection")
            .field("controller_endpoint", &self.controller_endpoint)
            .field("controller_cacert", &self.controller_cacert.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterSection {
    pub port: u16,
    /// Minutes between collections.
    pub collect_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSection {
    pub virt_macs: Vec<String>,
    pub match_interfaces: String,
}

impl AgentConfigDocument {
    /// Build the document; `fallback_ca` is used only when no certificate
    /// was configured explicitly.
    pub fn new(settings: &ValidatedSettings, fallback_ca: Option<&str>) -> Self {
        let controller_cacert = settings
            .controller_ca_cert()
            .map(|cert| String::from_utf8_lossy(cert.expose()).into_owned())
            .or_else(|| fallback_ca.filter(|ca| !ca.trim().is_empty()).map(str::to_string));

        Self {
            debug: settings.debug(),
            customer: CustomerSection {
                name: settings.customer().to_string(),
                cloud_name: settings.cloud_name().to_string(),
            },
            juju: JujuSection {
                controller_endpoint: settings
                    .controller_endpoints()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                controller_cacert,
                username: settings.juju_user().to_string(),
                password: settings.juju_password().expose().clone(),
            },
            exporter: ExporterSection {
                port: settings.scrape_port(),
                collect_interval: settings.scrape_interval_minutes(),
            },
            detection: DetectionSection {
                virt_macs: settings
                    .virtual_mac_prefixes()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                match_interfaces: settings.match_interfaces_pattern().as_str().to_string(),
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String, RenderError> {
        serde_yaml::to_string(self).map_err(RenderError::Encode)
    }

    pub fn from_yaml(content: &str) -> Result<Self, RenderError> {
        serde_yaml::from_str(content).map_err(RenderError::Decode)
    }
}

/// Result of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// New content was installed.
    Written,
    /// The file already held identical bytes; nothing was touched.
    Unchanged,
}

/// Writes the collector config to a fixed path.
#[derive(Debug, Clone)]
pub struct AgentConfigRenderer {
    path: PathBuf,
}

impl Default for AgentConfigRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_CONFIG_PATH)
    }
}

impl AgentConfigRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render and install the document if its bytes differ from what is on
    /// disk.
    pub fn render(
        &self,
        settings: &ValidatedSettings,
        fallback_ca: Option<&str>,
    ) -> Result<RenderOutcome, RenderError> {
        let content = AgentConfigDocument::new(settings, fallback_ca).to_yaml()?;
        self.write_if_changed(content.as_bytes())
    }

    /// [`render`](Self::render), then restart the collector when the file
    /// changed or an earlier restart after a change never completed.
    pub fn apply(
        &self,
        settings: &ValidatedSettings,
        fallback_ca: Option<&str>,
        host: &mut dyn Host,
    ) -> Result<RenderOutcome, RenderError> {
        let outcome = self.render(settings, fallback_ca)?;
        if outcome == RenderOutcome::Written || self.restart_pending() {
            host.restart_collector().map_err(RenderError::Restart)?;
            self.clear_restart_pending()?;
            info!(path = %self.path.display(), ?outcome, "collector restarted after config change");
        }
        Ok(outcome)
    }

    /// Whether the file on disk is newer than the running collector.
    pub fn restart_pending(&self) -> bool {
        self.pending_marker().exists()
    }

    fn pending_marker(&self) -> PathBuf {
        sibling(&self.path, "restart-pending")
    }

    fn clear_restart_pending(&self) -> Result<(), RenderError> {
        let marker = self.pending_marker();
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RenderError::Io {
                operation: "remove",
                path: marker,
                source,
            }),
        }
    }

    fn write_if_changed(&self, content: &[u8]) -> Result<RenderOutcome, RenderError> {
        match fs::read(&self.path) {
            Ok(existing) if existing == content => {
                debug!(path = %self.path.display(), "agent config unchanged");
                return Ok(RenderOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RenderError::Io {
                    operation: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        }

        // Set before the rename: from here on a restart is owed.
        let marker = self.pending_marker();
        create_parent(&marker)?;
        fs::write(&marker, b"").map_err(|source| RenderError::Io {
            operation: "write",
            path: marker,
            source,
        })?;

        atomic_write(&self.path, content)?;
        info!(
            path = %self.path.display(),
            bytes = content.len(),
            digest = %short_digest(content),
            "agent config written"
        );
        Ok(RenderOutcome::Written)
    }
}

/// Hidden file next to `path`: `dir/.name.suffix`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "agent-config".to_string());
    parent_dir(path).join(format!(".{file_name}.{suffix}"))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn create_parent(path: &Path) -> Result<(), RenderError> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(|source| RenderError::Io {
        operation: "create directory",
        path: parent,
        source,
    })
}

/// Write to a sibling temp file, sync it, then rename over the target so
/// readers see either the old or the new file.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), RenderError> {
    let io_err = |operation: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source| RenderError::Io {
            operation,
            path,
            source,
        }
    };

    create_parent(path)?;
    let tmp = sibling(path, "tmp");

    let written = (|| {
        let mut file = File::create(&tmp)?;
        restrict_permissions(&file)?;
        file.write_all(content)?;
        file.sync_all()
    })();
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_err("write", &tmp)(source));
    }

    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err("rename", path)(source));
    }
    Ok(())
}

// The document carries the controller password.
#[cfg(unix)]
fn restrict_permissions(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> std::io::Result<()> {
    Ok(())
}

fn short_digest(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use juju_exporter_core::config::{self, RawConfig};
    use juju_exporter_core::validate;

    fn settings() -> ValidatedSettings {
        let mut raw = RawConfig::new();
        raw.set(config::CUSTOMER, "acme")
            .set(config::CLOUD_NAME, "prod-1")
            .set(config::CONTROLLER_URL, "10.0.0.1:17070,10.0.0.2:17070")
            .set(config::JUJU_USER, "exporter")
            .set(config::JUJU_PASSWORD, "s3cret")
            .set(config::MATCH_INTERFACES, "^(en|eth)");
        validate(&raw).unwrap()
    }

    #[test]
    fn test_document_round_trip() {
        let doc = AgentConfigDocument::new(&settings(), None);
        let yaml = doc.to_yaml().unwrap();
        assert_eq!(AgentConfigDocument::from_yaml(&yaml).unwrap(), doc);

        assert_eq!(doc.customer.name, "acme");
        assert_eq!(doc.juju.controller_endpoint, vec!["10.0.0.1:17070", "10.0.0.2:17070"]);
        assert_eq!(doc.exporter.port, 5000);
        assert_eq!(doc.exporter.collect_interval, 15);
        assert_eq!(doc.detection.match_interfaces, "^(en|eth)");
        assert!(doc.detection.virt_macs.contains(&"52:54:00".to_string()));
        assert!(!yaml.contains("controller_cacert"));
    }

    #[test]
    fn test_fallback_ca_used_only_without_explicit_cert() {
        let doc = AgentConfigDocument::new(&settings(), Some("-----BEGIN CERTIFICATE-----\n"));
        assert_eq!(
            doc.juju.controller_cacert.as_deref(),
            Some("-----BEGIN CERTIFICATE-----\n")
        );

        let doc = AgentConfigDocument::new(&settings(), Some("   "));
        assert_eq!(doc.juju.controller_cacert, None);
    }

    #[test]
    fn test_debug_output_hides_password() {
        let doc = AgentConfigDocument::new(&settings(), None);
        let rendered = format!("{doc:?}");
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_render_skips_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("nested/config.yaml"));

        assert_eq!(renderer.render(&settings(), None).unwrap(), RenderOutcome::Written);
        assert_eq!(renderer.render(&settings(), None).unwrap(), RenderOutcome::Unchanged);

        let on_disk = fs::read_to_string(renderer.path()).unwrap();
        assert_eq!(
            AgentConfigDocument::from_yaml(&on_disk).unwrap(),
            AgentConfigDocument::new(&settings(), None)
        );
        assert!(!dir.path().join("nested/.config.yaml.tmp").exists());
    }

    #[test]
    fn test_apply_restarts_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("config.yaml"));
        let mut host = MemoryHost::new(RawConfig::new());

        renderer.apply(&settings(), None, &mut host).unwrap();
        renderer.apply(&settings(), None, &mut host).unwrap();
        assert_eq!(host.restarts, 1);
        assert!(!renderer.restart_pending());
    }

    #[test]
    fn test_failed_restart_is_retried_on_next_apply() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("config.yaml"));
        let mut host = MemoryHost::new(RawConfig::new());
        host.failing_restarts = 1;

        assert!(matches!(
            renderer.apply(&settings(), None, &mut host),
            Err(RenderError::Restart(_))
        ));
        assert_eq!(host.restarts, 0);
        assert!(renderer.restart_pending());

        assert_eq!(
            renderer.apply(&settings(), None, &mut host).unwrap(),
            RenderOutcome::Unchanged
        );
        assert_eq!(host.restarts, 1);
        assert!(!renderer.restart_pending());

        renderer.apply(&settings(), None, &mut host).unwrap();
        assert_eq!(host.restarts, 1);
    }

    #[test]
    fn test_render_alone_leaves_restart_owed() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("config.yaml"));
        renderer.render(&settings(), None).unwrap();
        assert!(renderer.restart_pending());

        let mut host = MemoryHost::new(RawConfig::new());
        renderer.apply(&settings(), None, &mut host).unwrap();
        assert_eq!(host.restarts, 1);
    }

    #[test]
    fn test_render_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let renderer = AgentConfigRenderer::new(blocker.join("config.yaml"));
        assert!(matches!(
            renderer.render(&settings(), None),
            Err(RenderError::Io { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rendered_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let renderer = AgentConfigRenderer::new(dir.path().join("config.yaml"));
        renderer.render(&settings(), None).unwrap();
        let mode = fs::metadata(renderer.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
