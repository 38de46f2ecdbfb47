//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and the shared record types,
//! never from `crate::infra`, `crate::commands`, or `crate::output`.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use idve_common::{InstanceRecord, ProvisioningTemplate, StoragePool};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
}

// ── Host Filesystem Port ──────────────────────────────────────────────────────

/// Filesystem effects needed by the lifecycle services.
///
/// Removal methods treat an absent path as success.
#[allow(async_fn_in_trait)]
pub trait HostFs {
    async fn exists(&self, path: &Path) -> bool;
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Write via a temporary sibling and rename, so readers never see a
    /// partial file.
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;
    async fn remove_file(&self, path: &Path) -> Result<()>;
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

// ── Network Probe Port ────────────────────────────────────────────────────────

/// Local port availability.
#[allow(async_fn_in_trait)]
pub trait PortProbe {
    /// Whether a listener could bind `port` on the loopback interface right now.
    async fn is_free(&self, port: u16) -> bool;
}

// ── Guest Channel Port ────────────────────────────────────────────────────────

/// JSON request/response over the guest agent and monitor sockets.
#[allow(async_fn_in_trait)]
pub trait GuestChannel {
    /// Send one guest agent command and return its `return` payload.
    async fn agent_command(&self, socket: &Path, command: &str) -> Result<serde_json::Value>;
    /// Negotiate QMP capabilities, run one command, and return its `return`
    /// payload.
    async fn monitor_command(
        &self,
        socket: &Path,
        command: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Composite trait: everything the lifecycle needs from the host.
pub trait Host: CommandRunner + HostFs + PortProbe + GuestChannel {}

/// Blanket implementation: any type implementing all four sub-traits is a `Host`.
impl<T> Host for T where T: CommandRunner + HostFs + PortProbe + GuestChannel {}

// ── Persistence Ports ─────────────────────────────────────────────────────────

/// Durable instance records, one per ID.
#[allow(async_fn_in_trait)]
pub trait InstanceStore {
    /// Load a record, returning `None` if it does not exist.
    async fn load(&self, id: &str) -> Result<Option<InstanceRecord>>;
    /// Persist a record atomically.
    async fn save(&self, record: &InstanceRecord) -> Result<()>;
    /// Remove a record. Absent records are not an error.
    async fn remove(&self, id: &str) -> Result<()>;
    /// All records, sorted by ID.
    async fn list(&self) -> Result<Vec<InstanceRecord>>;
}

/// Read-only storage pool catalogue.
#[allow(async_fn_in_trait)]
pub trait PoolRegistry {
    async fn find_pool(&self, name: &str) -> Result<Option<StoragePool>>;
}

/// Read-only provisioning template catalogue.
#[allow(async_fn_in_trait)]
pub trait TemplateRegistry {
    async fn find_template(&self, name: &str) -> Result<Option<ProvisioningTemplate>>;
    async fn templates(&self) -> Result<Vec<ProvisioningTemplate>>;
}

// ── Config Port ───────────────────────────────────────────────────────────────

/// Loads the orchestrator configuration.
pub trait ConfigStore {
    /// Load the configuration, falling back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn load(&self) -> Result<crate::domain::IdveConfig>;
    /// Location of the configuration file.
    fn path(&self) -> std::path::PathBuf;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait, no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

/// Reporter that discards every event.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}
