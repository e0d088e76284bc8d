//! Error kinds surfaced by the lifecycle orchestrator and the platform backends.

use std::io;

/// Everything that can go wrong while installing, starting, stopping or
/// running a service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No backend exists for the host OS, or a facility the backend needs is missing.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A privileged operation was attempted without root/Administrator rights.
    #[error("elevated rights required: {0}")]
    NoElevatedRights(String),

    #[error("service '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("service '{0}' is not installed")]
    NotInstalled(String),

    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("service '{0}' is not running")]
    NotRunning(String),

    /// Fork, signal delivery, SCM call or similar OS-level failure.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid service name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    /// A collaborator callback returned an error.
    #[error("`{hook}` callback failed: {reason:#}")]
    Hook {
        hook: &'static str,
        reason: anyhow::Error,
    },
}

impl ServiceError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn hook(hook: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |reason| Self::Hook { hook, reason }
    }

    /// Same kind and message, for an error that must be reported more than
    /// once. Sources are flattened to their text.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::UnsupportedPlatform(m) => Self::UnsupportedPlatform(m.clone()),
            Self::NoElevatedRights(m) => Self::NoElevatedRights(m.clone()),
            Self::AlreadyInstalled(m) => Self::AlreadyInstalled(m.clone()),
            Self::NotInstalled(m) => Self::NotInstalled(m.clone()),
            Self::AlreadyRunning(m) => Self::AlreadyRunning(m.clone()),
            Self::NotRunning(m) => Self::NotRunning(m.clone()),
            Self::OperationFailed(m) => Self::OperationFailed(m.clone()),
            Self::Io { context, source } => Self::Io {
                context: context.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Self::InvalidName { name, reason } => Self::InvalidName {
                name: name.clone(),
                reason: *reason,
            },
            Self::Config(m) => Self::Config(m.clone()),
            Self::Hook { hook, reason } => Self::Hook {
                hook: *hook,
                reason: anyhow::anyhow!("{reason:#}"),
            },
        }
    }

    /// True for the state-precondition kinds (already/not installed, already/not
    /// running). These are reported, never escalated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInstalled(_)
                | Self::NotInstalled(_)
                | Self::AlreadyRunning(_)
                | Self::NotRunning(_)
        )
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
