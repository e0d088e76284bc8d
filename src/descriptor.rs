//! Immutable service identity shared between the orchestrator and its backend.

use crate::error::{Result, ServiceError};

/// Longest name accepted; the SCM caps service names at 256 characters and a
/// PID file name must fit comfortably in NAME_MAX.
const MAX_NAME_LEN: usize = 200;

/// Identity of a managed service. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    description: String,
    auto_start: bool,
}

impl ServiceDescriptor {
    /// Build a descriptor, rejecting names that are unsafe as a file name,
    /// an init script name or an SCM key.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        auto_start: bool,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            auto_start,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Governs crash relaunch and boot-time start registration.
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| ServiceError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    if name.starts_with(['.', '-']) {
        return Err(invalid("name must not start with '.' or '-'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}
