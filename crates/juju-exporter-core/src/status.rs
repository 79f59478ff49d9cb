//! Externally visible unit status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workload state reported to the deployment tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Missing or invalid configuration; needs an operator edit.
    Blocked,
    /// Configuration is fine but the collector is not available yet.
    Waiting,
    /// Collector configured and running.
    Active,
    /// A render or publish step failed unexpectedly.
    Error,
}

impl UnitState {
    pub fn label(&self) -> &'static str {
        match self {
            UnitState::Blocked => "blocked",
            UnitState::Waiting => "waiting",
            UnitState::Active => "active",
            UnitState::Error => "error",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State plus the human-readable message shown next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub state: UnitState,
    pub message: String,
}

impl UnitStatus {
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(UnitState::Blocked, message)
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self::new(UnitState::Waiting, message)
    }

    pub fn active(message: impl Into<String>) -> Self {
        Self::new(UnitState::Active, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(UnitState::Error, message)
    }

    fn new(state: UnitState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == UnitState::Active
    }
}

/// Before any event has been handled there is no configuration.
impl Default for UnitStatus {
    fn default() -> Self {
        Self::blocked("Waiting for configuration")
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status_is_blocked() {
        assert_eq!(UnitStatus::default().state, UnitState::Blocked);
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitStatus::active("Unit is ready").to_string(), "active: Unit is ready");
        assert_eq!(serde_json::to_string(&UnitState::Waiting).unwrap(), "\"waiting\"");
    }
}
