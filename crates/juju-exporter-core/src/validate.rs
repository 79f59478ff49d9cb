//! Configuration validation.
//!
//! [`validate`] is a pure function of its input. It runs every check to the
//! end and reports all problems at once: missing required options first, then
//! invalid values, each group in declaration order.

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose;
use tracing::{debug, warn};

use crate::config::{self, ConfigValue, RawConfig};
use crate::error::{FieldError, ValidationErrors};
use crate::settings::{ControllerEndpoint, InterfacePattern, MacPrefix, Secret, ValidatedSettings};

/// Validate a raw option mapping into settings the unit can act on.
pub fn validate(raw: &RawConfig) -> Result<ValidatedSettings, ValidationErrors> {
    let mut errors = Vec::new();

    let debug = flag(raw, config::DEBUG, &mut errors);
    let customer = text_option(raw, config::CUSTOMER, &mut errors);
    let cloud_name = text_option(raw, config::CLOUD_NAME, &mut errors);
    let controller_endpoints = text_option(raw, config::CONTROLLER_URL, &mut errors)
        .and_then(|url| controller_endpoints(&url, &mut errors));
    let controller_ca_cert = ca_cert(raw, &mut errors);
    let juju_user = text_option(raw, config::JUJU_USER, &mut errors);
    let juju_password = text_option(raw, config::JUJU_PASSWORD, &mut errors).map(Secret::new);
    let virtual_mac_prefixes = mac_prefixes(raw, &mut errors);
    let match_interfaces_pattern = interface_pattern(raw, &mut errors);
    let scrape_port = ranged_int(raw, config::SCRAPE_PORT, 1, 65535, &mut errors)
        .and_then(|p| u16::try_from(p).ok());
    let scrape_interval = positive_u32(raw, config::SCRAPE_INTERVAL, &mut errors);
    let scrape_timeout = positive_u32(raw, config::SCRAPE_TIMEOUT, &mut errors);

    // Every helper that yields `None` has recorded at least one error.
    let (
        Some(debug),
        Some(customer),
        Some(cloud_name),
        Some(controller_endpoints),
        Some(controller_ca_cert),
        Some(juju_user),
        Some(juju_password),
        Some(virtual_mac_prefixes),
        Some(match_interfaces_pattern),
        Some(scrape_port),
        Some(scrape_interval_minutes),
        Some(scrape_timeout_seconds),
    ) = (
        debug,
        customer,
        cloud_name,
        controller_endpoints,
        controller_ca_cert,
        juju_user,
        juju_password,
        virtual_mac_prefixes,
        match_interfaces_pattern,
        scrape_port,
        scrape_interval,
        scrape_timeout,
    )
    else {
        return Err(reject(errors));
    };

    let settings = ValidatedSettings {
        debug,
        customer,
        cloud_name,
        controller_endpoints,
        controller_ca_cert,
        juju_user,
        juju_password,
        scrape_port,
        scrape_interval_minutes,
        scrape_timeout_seconds,
        virtual_mac_prefixes,
        match_interfaces_pattern,
    };

    for warning in settings.warnings() {
        warn!(%warning, "configuration accepted with warning");
    }
    debug!(
        endpoints = settings.controller_endpoints.len(),
        mac_prefixes = settings.virtual_mac_prefixes.len(),
        port = settings.scrape_port,
        "configuration validated"
    );
    Ok(settings)
}

fn reject(mut errors: Vec<FieldError>) -> ValidationErrors {
    // Stable sort keeps per-option order, e.g. several bad endpoints.
    errors.sort_by_key(|e| (!e.is_missing(), config::declaration_index(e.option())));
    let errors = ValidationErrors::new(errors);
    warn!(count = errors.len(), errors = %errors, "configuration rejected");
    errors
}

fn text(raw: &RawConfig, name: &str) -> String {
    raw.effective(name)
        .map(|v| v.to_text())
        .unwrap_or_default()
}

/// A declared text option. Blank values are missing when the declaration
/// marks the option required. Secret values keep their bytes; only the
/// emptiness check looks at the trimmed form.
fn text_option(raw: &RawConfig, name: &'static str, errors: &mut Vec<FieldError>) -> Option<String> {
    let (required, secret) =
        config::option_spec(name).map_or((false, false), |spec| (spec.required, spec.secret));
    let value = text(raw, name);
    if value.trim().is_empty() {
        if required {
            errors.push(FieldError::Missing(name));
            return None;
        }
        return Some(String::new());
    }
    Some(if secret { value } else { value.trim().to_string() })
}

fn flag(raw: &RawConfig, name: &'static str, errors: &mut Vec<FieldError>) -> Option<bool> {
    match raw.effective(name) {
        None => Some(false),
        Some(value) => match value.as_bool() {
            Some(b) => Some(b),
            None => {
                errors.push(FieldError::invalid(name, "must be true or false"));
                None
            }
        },
    }
}

fn ranged_int(
    raw: &RawConfig,
    name: &'static str,
    min: i64,
    max: i64,
    errors: &mut Vec<FieldError>,
) -> Option<i64> {
    let Some(value) = raw.effective(name) else {
        errors.push(FieldError::Missing(name));
        return None;
    };
    match value.as_int() {
        Some(n) if (min..=max).contains(&n) => Some(n),
        Some(_) => {
            errors.push(FieldError::invalid(name, format!("must be between {min} and {max}")));
            None
        }
        None => {
            errors.push(FieldError::invalid(name, "must be an integer"));
            None
        }
    }
}

fn positive_u32(raw: &RawConfig, name: &'static str, errors: &mut Vec<FieldError>) -> Option<u32> {
    let Some(value) = raw.effective(name) else {
        errors.push(FieldError::Missing(name));
        return None;
    };
    match value.as_int() {
        Some(n) if n < 1 => {
            errors.push(FieldError::invalid(name, "must be a positive integer"));
            None
        }
        Some(n) => match u32::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                errors.push(FieldError::invalid(name, "is too large"));
                None
            }
        },
        None => {
            errors.push(FieldError::invalid(name, "must be a positive integer"));
            None
        }
    }
}

fn controller_endpoints(url: &str, errors: &mut Vec<FieldError>) -> Option<Vec<ControllerEndpoint>> {
    let mut endpoints = Vec::new();
    let mut failed = false;
    for entry in url.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match ControllerEndpoint::parse(entry) {
            Ok(ep) => endpoints.push(ep),
            Err(reason) => {
                errors.push(FieldError::invalid(config::CONTROLLER_URL, reason));
                failed = true;
            }
        }
    }

    if failed {
        return None;
    }
    if endpoints.is_empty() {
        errors.push(FieldError::invalid(
            config::CONTROLLER_URL,
            "no controller endpoints given",
        ));
        return None;
    }
    Some(endpoints)
}

// `Some(None)` means no explicit certificate, which is valid.
fn ca_cert(raw: &RawConfig, errors: &mut Vec<FieldError>) -> Option<Option<Secret<Vec<u8>>>> {
    let encoded: String = text(raw, config::CONTROLLER_CA_CERT)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if encoded.is_empty() {
        return Some(None);
    }

    let decoded = match general_purpose::STANDARD.decode(encoded.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            errors.push(FieldError::invalid(
                config::CONTROLLER_CA_CERT,
                format!("not valid base64 ({e})"),
            ));
            return None;
        }
    };
    if std::str::from_utf8(&decoded).is_err() {
        errors.push(FieldError::invalid(
            config::CONTROLLER_CA_CERT,
            "decoded certificate is not text",
        ));
        return None;
    }
    Some(Some(Secret::new(decoded)))
}

fn mac_prefixes(raw: &RawConfig, errors: &mut Vec<FieldError>) -> Option<BTreeSet<MacPrefix>> {
    let value = raw
        .effective(config::VIRTUAL_MACS)
        .unwrap_or(ConfigValue::Str(String::new()))
        .to_text();

    let mut prefixes = BTreeSet::new();
    let mut failed = false;
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match MacPrefix::parse(token) {
            Ok(prefix) => {
                prefixes.insert(prefix);
            }
            Err(reason) => {
                errors.push(FieldError::invalid(config::VIRTUAL_MACS, reason));
                failed = true;
            }
        }
    }
    (!failed).then_some(prefixes)
}

fn interface_pattern(raw: &RawConfig, errors: &mut Vec<FieldError>) -> Option<InterfacePattern> {
    match InterfacePattern::compile(&text(raw, config::MATCH_INTERFACES)) {
        Ok(pattern) => Some(pattern),
        Err(_) => {
            errors.push(FieldError::invalid(
                config::MATCH_INTERFACES,
                "not a valid regular expression",
            ));
            None
        }
    }
}
