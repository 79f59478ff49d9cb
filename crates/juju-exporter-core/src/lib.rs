//! juju-exporter-core: option schema, validation and status types for the
//! Juju exporter operator.
//!
//! Nothing in this crate touches the collector or the relation store. It turns
//! a [`RawConfig`] into [`ValidatedSettings`] (or an itemised list of
//! [`FieldError`]s) and defines the [`UnitStatus`] vocabulary the reconciler
//! reports through.

pub mod channel;
pub mod config;
pub mod error;
pub mod settings;
pub mod status;
pub mod validate;

pub use channel::{install_channel, parse_controller_version, UnsupportedController};
pub use config::{ConfigValue, OptionSpec, RawConfig, OPTIONS};
pub use error::{ConfigFileError, FieldError, ValidationErrors};
pub use settings::{
    ConfigWarning, ControllerEndpoint, InterfacePattern, MacPrefix, Secret, ValidatedSettings,
};
pub use status::{UnitState, UnitStatus};
pub use validate::validate;
