//! Instance lifecycle orchestration.
//!
//! Composes storage, seed, display, supervisor, and address services into
//! the public operations. Every mutating operation holds the instance's lock
//! for its whole read-modify-write cycle; MAC allocation additionally holds a
//! registry-wide lock because uniqueness spans all instances.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use idve_common::{
    BootSpec, DiskBus, DisplayPorts, Firmware, HardwareSpec, InstanceRecord, InstanceStatus,
    NetworkSpec, NicSpec, OsFamily, ProvisioningTemplate, StoragePool, StorageSpec,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::application::ports::{
    Host, InstanceStore, PoolRegistry, ProgressReporter, TemplateRegistry,
};
use crate::application::services::locks::InstanceLocks;
use crate::application::services::{address, display, seed, storage, supervisor};
use crate::domain::InstanceError;
use crate::domain::config::IdveConfig;
use crate::domain::display::{console_url, display_number, display_port, proxy_search_start};
use crate::domain::instance::{
    assign_macs, disk_handle, is_rbd_handle, merge_update, validate_hardware,
    validate_instance_id,
};
use crate::domain::launch::{LaunchContext, synthesize};
use crate::domain::network::bridge_names;
use crate::domain::seed::SeedInput;

// ── Request and outcome types ─────────────────────────────────────────────────

/// Declaration accepted by `create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hardware: HardwareSpec,
    pub storage: StorageRequest,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub boot: BootSpec,
    /// Start the instance once it is created.
    #[serde(default)]
    pub start: bool,
}

/// Storage part of a [`CreateRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageRequest {
    #[serde(default = "default_pool")]
    pub pool: String,
    pub size_gib: u64,
    #[serde(default)]
    pub bus: DiskBus,
    #[serde(default)]
    pub base_image: Option<PathBuf>,
}

fn default_pool() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub record: InstanceRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<StartOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub record: InstanceRecord,
    /// Features that were skipped so the instance could start anyway.
    pub warnings: Vec<String>,
}

/// Observed state of one instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub id: String,
    pub name: String,
    /// Liveness as reported by the OS.
    pub status: InstanceStatus,
    /// Status last written to the record.
    pub recorded: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Remote display endpoints of an instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConsoleInfo {
    pub id: String,
    pub running: bool,
    pub display_port: u16,
    pub vnc_display: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator<H, S, R> {
    host: H,
    store: S,
    registry: R,
    config: IdveConfig,
    locks: InstanceLocks,
    mac_lock: Mutex<()>,
}

impl<H, S, R> Orchestrator<H, S, R>
where
    H: Host,
    S: InstanceStore,
    R: PoolRegistry + TemplateRegistry,
{
    pub fn new(host: H, store: S, registry: R, config: IdveConfig) -> Self {
        Self {
            host,
            store,
            registry,
            config,
            locks: InstanceLocks::new(),
            mac_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &IdveConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ── create ────────────────────────────────────────────────────────────────

    /// Validate a declaration, provision its disk and seed, and persist it.
    ///
    /// Nothing is persisted unless every provisioning step succeeded, so a
    /// failed create never leaves a record behind.
    ///
    /// # Errors
    ///
    /// `AlreadyExists`, `PoolNotFound`, `TemplateNotFound`, `UnknownBridge`,
    /// `MacInUse`, or `Provisioning`; plus any start error when
    /// `request.start` is set.
    pub async fn create(
        &self,
        request: CreateRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<CreateOutcome> {
        validate_instance_id(&request.id)?;
        let id = request.id.clone();
        let start = request.start;
        let record = {
            let _guard = self.locks.acquire(&id).await;
            self.create_locked(request, reporter).await?
        };
        let start = if start {
            Some(self.start(&id, reporter).await?)
        } else {
            None
        };
        Ok(CreateOutcome { record, start })
    }

    async fn create_locked(
        &self,
        request: CreateRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<InstanceRecord> {
        let cfg = &self.config;
        let id = request.id;
        if self.store.load(&id).await?.is_some() {
            return Err(InstanceError::AlreadyExists(id).into());
        }
        if request.storage.size_gib == 0 {
            return Err(InstanceError::InvalidDeclaration(
                "disk size must be at least 1 GiB".to_string(),
            )
            .into());
        }
        validate_hardware(&request.hardware)?;

        let pool = self.pool_for(&request.storage.pool).await?;
        let template = match &request.boot.template {
            Some(name) => Some(self.template_for(name).await?),
            None => None,
        };
        self.validate_bridges(&request.network.nics).await?;

        let mut hardware = request.hardware;
        if let Some(template) = &template {
            if hardware.os_family == OsFamily::Other {
                hardware.os_family = template.os_family;
            }
        }
        let base_image = request
            .storage
            .base_image
            .or_else(|| template.as_ref().and_then(|t| t.base_image.clone()));

        let _mac_guard = self.mac_lock.lock().await;
        let mut network = request.network;
        let taken = self.taken_macs(&id).await?;
        assign_macs(&mut network.nics, &taken, &id, &mut rand::thread_rng())?;

        reporter.step("provisioning disk...");
        let disk = storage::provision(
            &self.host,
            &self.host,
            &cfg.binaries,
            &id,
            &pool,
            request.storage.size_gib,
            base_image.as_deref(),
        )
        .await?;

        let mut record = InstanceRecord {
            name: request.name.unwrap_or_else(|| id.clone()),
            tpm: hardware.tpm.then(|| cfg.paths.tpm_handles(&id)),
            hardware,
            storage: StorageSpec {
                backend: pool.kind(),
                pool: pool.name.clone(),
                size_gib: request.storage.size_gib,
                bus: request.storage.bus,
                base_image,
                disk: Some(disk),
            },
            network,
            boot: request.boot,
            status: InstanceStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            updated_at: None,
            seed_image: None,
            process: None,
            display: None,
            warnings: Vec::new(),
            id,
        };

        if let Some(template) = &template {
            reporter.step("building seed image...");
            match seed::build(
                &self.host,
                &cfg.binaries,
                &cfg.paths.seed_dir,
                template,
                &seed_input(&record),
            )
            .await
            {
                Ok(artifacts) => record.seed_image = Some(artifacts.image),
                Err(e) => {
                    if let Err(cleanup) =
                        storage::remove(&self.host, &self.host, &cfg.binaries, &pool, &record.id)
                            .await
                    {
                        tracing::warn!(instance = %record.id, error = %cleanup, "could not remove disk after failed create");
                    }
                    if let Err(cleanup) =
                        seed::remove(&self.host, &cfg.paths.seed_dir, &record.id).await
                    {
                        tracing::warn!(instance = %record.id, error = %cleanup, "could not remove seed after failed create");
                    }
                    return Err(e);
                }
            }
        }

        self.store.save(&record).await?;
        tracing::info!(instance = %record.id, pool = %record.storage.pool, "instance created");
        reporter.success(&format!("instance {} created", record.id));
        Ok(record)
    }

    // ── update ────────────────────────────────────────────────────────────────

    /// Merge a partial declaration into a stored record.
    ///
    /// Changes apply on the next start. Disk size changes go through
    /// [`Orchestrator::resize`].
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidDeclaration`, `UnknownBridge`, `MacInUse`,
    /// `TemplateNotFound`, or `Provisioning` if the seed rebuild fails.
    pub async fn update(
        &self,
        id: &str,
        patch: &serde_json::Value,
        reporter: &impl ProgressReporter,
    ) -> Result<InstanceRecord> {
        let _guard = self.locks.acquire(id).await;
        let current = self.load(id).await?;
        let mut next = merge_update(&current, patch)?;
        if next.storage.size_gib != current.storage.size_gib {
            return Err(InstanceError::InvalidDeclaration(
                "disk size changes go through resize".to_string(),
            )
            .into());
        }
        if next.storage.bus != current.storage.bus {
            tracing::info!(instance = %id, "disk bus changed; applies on next start");
        }
        validate_hardware(&next.hardware)?;
        if next.network.nics != current.network.nics {
            self.validate_bridges(&next.network.nics).await?;
        }

        let _mac_guard = self.mac_lock.lock().await;
        let taken = self.taken_macs(id).await?;
        assign_macs(&mut next.network.nics, &taken, id, &mut rand::thread_rng())?;

        if next.hardware.tpm && next.tpm.is_none() {
            next.tpm = Some(self.config.paths.tpm_handles(id));
        }

        let seed_inputs_changed = next.boot != current.boot
            || next.network != current.network
            || next.hardware.guest_agent != current.hardware.guest_agent;
        match &next.boot.template {
            Some(name) if seed_inputs_changed || next.seed_image.is_none() => {
                let template = self.template_for(name).await?;
                reporter.step("rebuilding seed image...");
                let artifacts = seed::build(
                    &self.host,
                    &self.config.binaries,
                    &self.config.paths.seed_dir,
                    &template,
                    &seed_input(&next),
                )
                .await?;
                next.seed_image = Some(artifacts.image);
            }
            Some(_) => {}
            None => {
                if next.seed_image.take().is_some() {
                    seed::remove(&self.host, &self.config.paths.seed_dir, id).await?;
                }
            }
        }

        next.updated_at = Some(Utc::now());
        self.store.save(&next).await?;
        tracing::info!(instance = %id, "instance updated");
        if self.is_running(&next).await {
            reporter.warn("instance is running; changes apply on next start");
        }
        reporter.success(&format!("instance {id} updated"));
        Ok(next)
    }

    // ── start ─────────────────────────────────────────────────────────────────

    /// Launch the hypervisor and its companions.
    ///
    /// The TPM emulator and the display proxy are optional: if either fails
    /// the instance still starts and the failure is reported in
    /// [`StartOutcome::warnings`].
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyRunning`, `DisplayPortInUse`, `Provisioning` when
    /// the disk or seed cannot be prepared, or `Launch` when the hypervisor
    /// fails. A launch failure leaves the record in `error`.
    pub async fn start(&self, id: &str, reporter: &impl ProgressReporter) -> Result<StartOutcome> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(id).await?;
        let cfg = &self.config;

        if supervisor::find_hypervisor(&self.host, cfg, &record)
            .await?
            .is_some()
        {
            return Err(InstanceError::AlreadyRunning(id.to_string()).into());
        }
        let vnc_port = display_port(cfg.display.display_base, id);
        self.check_display_port(&record, vnc_port).await?;

        reporter.step("preparing disk...");
        let pool = self.pool_for(&record.storage.pool).await?;
        let disk = storage::provision(
            &self.host,
            &self.host,
            &cfg.binaries,
            id,
            &pool,
            record.storage.size_gib,
            record.storage.base_image.as_deref(),
        )
        .await?;
        record.storage.disk = Some(disk.clone());

        let seed = self.ensure_seed(&mut record, reporter).await?;

        if record.hardware.firmware == Firmware::Uefi {
            self.ensure_uefi_vars(id).await?;
        }

        let mut warnings = Vec::new();
        let tpm_socket = if record.hardware.tpm {
            let handles = cfg.paths.tpm_handles(id);
            reporter.step("starting TPM emulator...");
            match supervisor::start_tpm(&self.host, cfg, &handles).await {
                Ok(()) => {
                    let socket = handles.socket.clone();
                    record.tpm = Some(handles);
                    Some(socket)
                }
                Err(e) => {
                    tracing::warn!(instance = %id, error = %e, "starting without TPM");
                    warnings.push(format!("TPM unavailable, started without it: {e:#}"));
                    None
                }
            }
        } else {
            None
        };

        let ctx = self.launch_context(&record, disk, seed, tpm_socket.clone());
        let args = synthesize(&record, &ctx);

        reporter.step("starting hypervisor...");
        let handle = match supervisor::spawn_hypervisor(&self.host, cfg, &record, &args).await {
            Ok(handle) => handle,
            Err(e) => {
                if let (Some(_), Some(handles)) = (&tpm_socket, &record.tpm) {
                    if let Err(cleanup) = supervisor::stop_tpm(&self.host, cfg, handles).await {
                        tracing::warn!(instance = %id, error = %cleanup, "could not stop TPM emulator");
                    }
                }
                record.status = InstanceStatus::Error;
                record.warnings = vec![format!("{e:#}")];
                if let Err(save) = self.store.save(&record).await {
                    tracing::warn!(instance = %id, error = %save, "could not record launch failure");
                }
                return Err(e);
            }
        };

        let proxy = self.start_proxy(id, vnc_port, &mut warnings).await;

        for warning in &warnings {
            reporter.warn(warning);
        }
        record.status = InstanceStatus::Running;
        record.started_at = Some(Utc::now());
        record.process = Some(handle);
        record.display = Some(DisplayPorts {
            display: vnc_port,
            proxy,
        });
        record.warnings.clone_from(&warnings);
        self.store.save(&record).await?;

        tracing::info!(instance = %id, pid = handle.pid, display_port = vnc_port, ?proxy, "instance running");
        reporter.success(&format!("instance {id} running"));
        Ok(StartOutcome { record, warnings })
    }

    async fn start_proxy(&self, id: &str, display: u16, warnings: &mut Vec<String>) -> Option<u16> {
        let cfg = &self.config;
        if let Err(e) = supervisor::stop_proxy(&self.host, cfg, display).await {
            tracing::debug!(instance = %id, error = %e, "could not clear stale display proxy");
        }
        let start = proxy_search_start(cfg.display.proxy_base, id);
        let port = match display::allocate_proxy_port(&self.host, start, cfg.display.proxy_attempts).await {
            Ok(port) => port,
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "starting without display proxy");
                warnings.push(format!("display proxy unavailable: {e:#}"));
                return None;
            }
        };
        match supervisor::start_proxy(&self.host, cfg, display, port).await {
            Ok(()) => Some(port),
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "starting without display proxy");
                warnings.push(format!("display proxy unavailable: {e:#}"));
                None
            }
        }
    }

    /// Reject a start whose display port is held by another live instance.
    async fn check_display_port(&self, record: &InstanceRecord, port: u16) -> Result<()> {
        let base = self.config.display.display_base;
        for other in self.store.list().await? {
            if other.id == record.id || other.status != InstanceStatus::Running {
                continue;
            }
            let other_port = other
                .display
                .map_or_else(|| display_port(base, &other.id), |d| d.display);
            if other_port == port && self.is_running(&other).await {
                return Err(InstanceError::DisplayPortInUse {
                    port,
                    owner: other.id,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Seed image to attach, rebuilt when the record is seeded but the image
    /// is gone.
    async fn ensure_seed(
        &self,
        record: &mut InstanceRecord,
        reporter: &impl ProgressReporter,
    ) -> Result<Option<PathBuf>> {
        let Some(name) = record.boot.template.clone() else {
            return Ok(None);
        };
        if let Some(image) = &record.seed_image {
            if self.host.exists(image).await {
                return Ok(Some(image.clone()));
            }
        }
        reporter.step("rebuilding seed image...");
        let template = self.template_for(&name).await?;
        let artifacts = seed::build(
            &self.host,
            &self.config.binaries,
            &self.config.paths.seed_dir,
            &template,
            &seed_input(record),
        )
        .await?;
        record.seed_image = Some(artifacts.image.clone());
        Ok(Some(artifacts.image))
    }

    async fn ensure_uefi_vars(&self, id: &str) -> Result<()> {
        let vars = self.config.paths.uefi_vars(id);
        if self.host.exists(&vars).await {
            return Ok(());
        }
        let template = &self.config.hypervisor.ovmf_vars_template;
        self.host
            .create_dir_all(&self.config.paths.nvram_dir)
            .await
            .map_err(|e| InstanceError::Launch(format!("{e:#}")))?;
        self.host.copy(template, &vars).await.map_err(|e| {
            InstanceError::Launch(format!(
                "copying UEFI variable store {}: {e:#}",
                template.display()
            ))
        })?;
        Ok(())
    }

    fn launch_context(
        &self,
        record: &InstanceRecord,
        disk: String,
        seed: Option<PathBuf>,
        tpm_socket: Option<PathBuf>,
    ) -> LaunchContext {
        let cfg = &self.config;
        let id = &record.id;
        LaunchContext {
            disk,
            seed,
            display: display_number(cfg.display.display_base, id),
            keyboard: cfg.display.keyboard.clone(),
            tpm_socket,
            agent_socket: cfg.paths.agent_socket(id),
            monitor_socket: cfg.paths.monitor_socket(id),
            pid_file: cfg.paths.pid_file(id),
            accel: cfg.hypervisor.accel,
            ovmf_code: cfg.hypervisor.ovmf_code.clone(),
            uefi_vars: cfg.paths.uefi_vars(id),
        }
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    /// Stop the hypervisor and its companions. Idempotent.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `StillRunning` if the hypervisor survives `KILL`.
    pub async fn stop(&self, id: &str, reporter: &impl ProgressReporter) -> Result<InstanceRecord> {
        let _guard = self.locks.acquire(id).await;
        let record = self.load(id).await?;
        let record = self.stop_locked(record, reporter).await?;
        reporter.success(&format!("instance {id} stopped"));
        Ok(record)
    }

    async fn stop_locked(
        &self,
        record: InstanceRecord,
        reporter: &impl ProgressReporter,
    ) -> Result<InstanceRecord> {
        let cfg = &self.config;
        let id = record.id.clone();
        reporter.step("stopping hypervisor...");
        let was_running = supervisor::stop_hypervisor(&self.host, cfg, &record).await?;

        let display = record
            .display
            .map_or_else(|| display_port(cfg.display.display_base, &id), |d| d.display);
        if let Err(e) = supervisor::stop_proxy(&self.host, cfg, display).await {
            tracing::warn!(instance = %id, error = %e, "could not stop display proxy");
        }
        if let Some(handles) = &record.tpm {
            if let Err(e) = supervisor::stop_tpm(&self.host, cfg, handles).await {
                tracing::warn!(instance = %id, error = %e, "could not stop TPM emulator");
            }
        }
        if let Err(e) = supervisor::remove_runtime_files(&self.host, cfg, &id).await {
            tracing::warn!(instance = %id, error = %e, "could not remove runtime files");
        }

        let mut next = record.clone();
        next.process = None;
        next.display = None;
        if next.status != InstanceStatus::Stopped
            && next.status.can_transition_to(InstanceStatus::Stopped)
        {
            next.status = InstanceStatus::Stopped;
            next.stopped_at = Some(Utc::now());
        } else if was_running {
            next.stopped_at = Some(Utc::now());
        }
        if next != record {
            self.store.save(&next).await?;
        }
        if was_running {
            tracing::info!(instance = %id, "instance stopped");
        } else {
            tracing::debug!(instance = %id, "instance was not running");
        }
        Ok(next)
    }

    // ── status ────────────────────────────────────────────────────────────────

    /// Observed state of one instance. Never modifies the record.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists.
    pub async fn status(&self, id: &str) -> Result<StatusReport> {
        let record = self.load(id).await?;
        Ok(self.observe(record).await)
    }

    /// Observed state of every instance, queried concurrently.
    ///
    /// A failed observation reports the instance as stopped instead of
    /// failing the whole listing.
    ///
    /// # Errors
    ///
    /// Returns an error only if the records cannot be listed.
    pub async fn status_all(&self) -> Result<Vec<StatusReport>> {
        let records = self.store.list().await?;
        Ok(join_all(records.into_iter().map(|r| self.observe(r))).await)
    }

    async fn observe(&self, record: InstanceRecord) -> StatusReport {
        let handle = match supervisor::find_hypervisor(&self.host, &self.config, &record).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(instance = %record.id, error = %e, "liveness check failed");
                None
            }
        };
        let address = match handle {
            Some(_) => address::resolve(&self.host, &self.config, &record).await,
            None => None,
        };
        let display = record.display.filter(|_| handle.is_some());
        StatusReport {
            status: if handle.is_some() {
                InstanceStatus::Running
            } else {
                InstanceStatus::Stopped
            },
            recorded: record.status,
            pid: handle.map(|h| h.pid),
            display_port: display.map(|d| d.display),
            proxy_port: display.and_then(|d| d.proxy),
            address,
            warnings: record.warnings,
            id: record.id,
            name: record.name,
        }
    }

    // ── delete ────────────────────────────────────────────────────────────────

    /// Stop an instance and remove every artifact it owns.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `StillRunning` if the hypervisor cannot be stopped, in
    /// which case nothing is removed.
    pub async fn delete(&self, id: &str, reporter: &impl ProgressReporter) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let record = self.load(id).await?;
        let cfg = &self.config;

        let record = self
            .stop_locked(record, reporter)
            .await
            .with_context(|| format!("stopping {id} before delete"))?;
        if self.is_running(&record).await {
            return Err(InstanceError::StillRunning(id.to_string()).into());
        }

        reporter.step("removing disk...");
        match self.registry.find_pool(&record.storage.pool).await? {
            Some(pool) => {
                storage::remove(&self.host, &self.host, &cfg.binaries, &pool, id).await?;
            }
            None => match record.storage.disk.as_deref() {
                Some(disk) if !is_rbd_handle(disk) => {
                    self.host.remove_file(std::path::Path::new(disk)).await?;
                }
                Some(disk) => {
                    tracing::warn!(instance = %id, disk, "pool no longer registered; leaving image in place");
                    reporter.warn(&format!(
                        "pool {} is gone; image {disk} was not removed",
                        record.storage.pool
                    ));
                }
                None => {}
            },
        }

        seed::remove(&self.host, &cfg.paths.seed_dir, id).await?;
        if let Some(tpm) = &record.tpm {
            self.host.remove_dir_all(&tpm.state_dir).await?;
        }
        self.host.remove_file(&cfg.paths.uefi_vars(id)).await?;
        supervisor::remove_runtime_files(&self.host, cfg, id).await?;
        self.store.remove(id).await?;

        tracing::info!(instance = %id, "instance deleted");
        reporter.success(&format!("instance {id} deleted"));
        Ok(())
    }

    // ── resize ────────────────────────────────────────────────────────────────

    /// Grow the primary disk. Running instances are resized live.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PoolNotFound`, `ShrinkRejected`, or `Provisioning`.
    pub async fn resize(
        &self,
        id: &str,
        size_gib: u64,
        reporter: &impl ProgressReporter,
    ) -> Result<InstanceRecord> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(id).await?;
        let pool = self.pool_for(&record.storage.pool).await?;
        let handle = record
            .storage
            .disk
            .clone()
            .unwrap_or_else(|| disk_handle(&pool.backend, id));
        let monitor = self
            .is_running(&record)
            .await
            .then(|| self.config.paths.monitor_socket(id));

        reporter.step("resizing disk...");
        storage::resize(
            &self.host,
            &self.config.binaries,
            &pool,
            &handle,
            id,
            record.storage.size_gib,
            size_gib,
            monitor.as_deref(),
        )
        .await?;

        if size_gib != record.storage.size_gib {
            record.storage.size_gib = size_gib;
            record.updated_at = Some(Utc::now());
            self.store.save(&record).await?;
        }
        reporter.success(&format!("disk of {id} is {size_gib} GiB"));
        Ok(record)
    }

    // ── read-only queries ─────────────────────────────────────────────────────

    /// Stored record of one instance.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists.
    pub async fn get(&self, id: &str) -> Result<InstanceRecord> {
        self.load(id).await
    }

    /// Arguments the hypervisor would be launched with, without launching.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `PoolNotFound` if the disk was never provisioned and its
    /// pool is gone.
    pub async fn launch_command(&self, id: &str) -> Result<Vec<String>> {
        let record = self.load(id).await?;
        let disk = match &record.storage.disk {
            Some(disk) => disk.clone(),
            None => disk_handle(&self.pool_for(&record.storage.pool).await?.backend, id),
        };
        let tpm_socket = record
            .hardware
            .tpm
            .then(|| self.config.paths.tpm_handles(id).socket);
        let seed = if record.is_seeded() {
            Some(
                record
                    .seed_image
                    .clone()
                    .unwrap_or_else(|| self.config.paths.seed_dir_for(id).join(seed::SEED_IMAGE)),
            )
        } else {
            None
        };
        let ctx = self.launch_context(&record, disk, seed, tpm_socket);
        Ok(synthesize(&record, &ctx))
    }

    /// Guest address of a running instance, `None` when unknown.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists.
    pub async fn address(&self, id: &str) -> Result<Option<IpAddr>> {
        let record = self.load(id).await?;
        if !self.is_running(&record).await {
            return Ok(None);
        }
        Ok(address::resolve(&self.host, &self.config, &record).await)
    }

    /// Remote display endpoints of an instance.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists.
    pub async fn console(&self, id: &str) -> Result<ConsoleInfo> {
        let record = self.load(id).await?;
        let cfg = &self.config;
        let running = self.is_running(&record).await;
        let display = record
            .display
            .map_or_else(|| display_port(cfg.display.display_base, id), |d| d.display);
        let proxy_port = record.display.and_then(|d| d.proxy).filter(|_| running);
        Ok(ConsoleInfo {
            id: record.id,
            running,
            display_port: display,
            vnc_display: display_number(cfg.display.display_base, id),
            proxy_port,
            url: proxy_port.map(|p| console_url(&cfg.display.console_host, p)),
        })
    }

    /// Names of the provisioning templates on offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the template catalogue cannot be read.
    pub async fn templates(&self) -> Result<Vec<ProvisioningTemplate>> {
        self.registry.templates().await
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn load(&self, id: &str) -> Result<InstanceRecord> {
        validate_instance_id(id)?;
        self.store
            .load(id)
            .await?
            .ok_or_else(|| InstanceError::NotFound(id.to_string()).into())
    }

    async fn is_running(&self, record: &InstanceRecord) -> bool {
        match supervisor::find_hypervisor(&self.host, &self.config, record).await {
            Ok(handle) => handle.is_some(),
            Err(e) => {
                tracing::warn!(instance = %record.id, error = %e, "liveness check failed");
                false
            }
        }
    }

    async fn pool_for(&self, name: &str) -> Result<StoragePool> {
        self.registry
            .find_pool(name)
            .await?
            .ok_or_else(|| InstanceError::PoolNotFound(name.to_string()).into())
    }

    async fn template_for(&self, name: &str) -> Result<ProvisioningTemplate> {
        self.registry
            .find_template(name)
            .await?
            .ok_or_else(|| InstanceError::TemplateNotFound(name.to_string()).into())
    }

    /// MACs owned by every instance except `except`, mapped to their owner.
    async fn taken_macs(&self, except: &str) -> Result<HashMap<String, String>> {
        let mut taken = HashMap::new();
        for record in self.store.list().await? {
            if record.id == except {
                continue;
            }
            for mac in record.macs() {
                taken.insert(mac.to_ascii_lowercase(), record.id.clone());
            }
        }
        Ok(taken)
    }

    /// Reject NICs whose base bridge is not present on the host.
    ///
    /// Per-VLAN bridges are created on demand, so only the base bridge is
    /// checked. If the bridge list cannot be read the check is skipped.
    async fn validate_bridges(&self, nics: &[NicSpec]) -> Result<()> {
        if !self.config.network.validate_bridges || nics.is_empty() {
            return Ok(());
        }
        let ip = &self.config.binaries.ip;
        let output = match self.host.run(ip, &["-j", "link", "show", "type", "bridge"]).await {
            Ok(output) if output.status.success() => output,
            Ok(_) | Err(_) => {
                tracing::warn!("could not list host bridges; skipping bridge validation");
                return Ok(());
            }
        };
        let Ok(reply) = serde_json::from_slice::<serde_json::Value>(&output.stdout) else {
            tracing::warn!("unparseable bridge list; skipping bridge validation");
            return Ok(());
        };
        let known = bridge_names(&reply);
        for nic in nics {
            if !known.contains(&nic.bridge) {
                return Err(InstanceError::UnknownBridge(nic.bridge.clone()).into());
            }
        }
        Ok(())
    }
}

/// Seed renderer input drawn from a record.
fn seed_input(record: &InstanceRecord) -> SeedInput<'_> {
    SeedInput {
        instance_id: &record.id,
        hostname: record.boot.hostname.as_deref().unwrap_or(&record.id),
        domain: record.boot.domain.as_deref(),
        credentials: record.boot.credentials.as_ref(),
        network: record.network.provisioning.as_ref(),
        mac: record.primary_mac(),
        guest_agent: record.hardware.guest_agent,
    }
}
