//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

// ── Error kinds ───────────────────────────────────────────────────────────────

/// Coarse classification surfaced to users and in `--json` error objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ProvisioningFailure,
    LaunchFailure,
    Invalid,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ProvisioningFailure => "provisioning_failure",
            ErrorKind::LaunchFailure => "launch_failure",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Internal => "internal",
        }
    }
}

// ── Instance errors ───────────────────────────────────────────────────────────

/// Errors raised by lifecycle operations on an instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Instance '{0}' not found.")]
    NotFound(String),

    #[error("Storage pool '{0}' not found.")]
    PoolNotFound(String),

    #[error("Provisioning template '{0}' not found.")]
    TemplateNotFound(String),

    #[error("Instance '{0}' already exists.")]
    AlreadyExists(String),

    #[error("Instance '{0}' is already running.")]
    AlreadyRunning(String),

    #[error("MAC address {mac} is already assigned to instance '{owner}'.")]
    MacInUse { mac: String, owner: String },

    #[error("Display port {port} is held by running instance '{owner}'.")]
    DisplayPortInUse { port: u16, owner: String },

    #[error("No free proxy port in {first}..={last}.")]
    PortsExhausted { first: u16, last: u16 },

    #[error("Bridge '{0}' does not exist on this host.")]
    UnknownBridge(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Instance '{0}' is still running after stop; refusing to delete.")]
    StillRunning(String),

    #[error("Cannot shrink disk from {current} GiB to {requested} GiB.")]
    ShrinkRejected { current: u64, requested: u64 },

    #[error("Invalid instance ID '{0}': must match ^[A-Za-z0-9][A-Za-z0-9_-]{{0,63}}$")]
    InvalidId(String),

    #[error("Invalid MAC address '{0}': expected a unicast address like 52:54:00:12:34:56")]
    InvalidMac(String),

    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),
}

impl InstanceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstanceError::NotFound(_)
            | InstanceError::PoolNotFound(_)
            | InstanceError::TemplateNotFound(_) => ErrorKind::NotFound,
            InstanceError::AlreadyExists(_)
            | InstanceError::AlreadyRunning(_)
            | InstanceError::MacInUse { .. }
            | InstanceError::DisplayPortInUse { .. }
            | InstanceError::PortsExhausted { .. }
            | InstanceError::StillRunning(_) => ErrorKind::Conflict,
            InstanceError::Provisioning(_) | InstanceError::ShrinkRejected { .. } => {
                ErrorKind::ProvisioningFailure
            }
            InstanceError::Launch(_) => ErrorKind::LaunchFailure,
            InstanceError::UnknownBridge(_)
            | InstanceError::InvalidId(_)
            | InstanceError::InvalidMac(_)
            | InstanceError::InvalidDeclaration(_) => ErrorKind::Invalid,
        }
    }
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to orchestrator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Find the first typed domain error in an `anyhow` chain and return its kind.
///
/// Errors that carry no domain type are reported as `Internal`.
#[must_use]
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<InstanceError>() {
                Some(e.kind())
            } else if cause.downcast_ref::<ConfigError>().is_some() {
                Some(ErrorKind::Invalid)
            } else {
                None
            }
        })
        .unwrap_or(ErrorKind::Internal)
}
