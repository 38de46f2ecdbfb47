use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an instance as recorded by the configuration store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Created,
    Running,
    Stopped,
    Error,
}

impl InstanceStatus {
    /// Whether the record may move from `self` to `next`.
    ///
    /// `created → running ⇄ stopped`; `error` is reachable from anywhere and
    /// an errored instance may be started again or stopped.
    #[must_use]
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::{Created, Error, Running, Stopped};
        match (self, next) {
            (_, Error) => true,
            (Created | Stopped | Error, Running) => true,
            (Running | Stopped | Error, Stopped) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware flavour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    #[default]
    #[serde(alias = "seabios", alias = "legacy")]
    Bios,
    #[serde(alias = "ovmf")]
    Uefi,
}

/// Emulated chipset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
    #[default]
    Q35,
    #[serde(alias = "i440fx")]
    Pc,
}

impl Machine {
    #[must_use]
    pub fn as_qemu(self) -> &'static str {
        match self {
            Machine::Q35 => "q35",
            Machine::Pc => "pc",
        }
    }
}

/// Graphics adapter passed to `-vga`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Graphics {
    #[default]
    Std,
    Virtio,
    Qxl,
    Cirrus,
    None,
}

impl Graphics {
    #[must_use]
    pub fn as_qemu(self) -> &'static str {
        match self {
            Graphics::Std => "std",
            Graphics::Virtio => "virtio",
            Graphics::Qxl => "qxl",
            Graphics::Cirrus => "cirrus",
            Graphics::None => "none",
        }
    }
}

/// Guest operating-system family. Drives disk attachment and CPU fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Freebsd,
    #[default]
    Other,
}

/// Disk bus for the primary disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    #[default]
    Virtio,
    Scsi,
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    #[serde(alias = "distributed", alias = "ceph")]
    Rbd,
}

/// CPU, memory, firmware, and device toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardwareSpec {
    pub cpu_sockets: u32,
    pub cpu_cores: u32,
    pub cpu_model: String,
    pub memory_mib: u64,
    pub firmware: Firmware,
    pub machine: Machine,
    pub graphics: Graphics,
    pub balloon: bool,
    pub tpm: bool,
    pub guest_agent: bool,
    pub os_family: OsFamily,
    /// Controller model used when the disk goes through the SCSI path.
    pub scsi_controller: String,
}

impl Default for HardwareSpec {
    fn default() -> Self {
        Self {
            cpu_sockets: 1,
            cpu_cores: 1,
            cpu_model: "host".to_string(),
            memory_mib: 1024,
            firmware: Firmware::default(),
            machine: Machine::default(),
            graphics: Graphics::default(),
            balloon: false,
            tpm: false,
            guest_agent: true,
            os_family: OsFamily::default(),
            scsi_controller: "lsi53c895a".to_string(),
        }
    }
}

/// Backing storage declaration plus the resolved disk handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSpec {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_pool")]
    pub pool: String,
    pub size_gib: u64,
    #[serde(default)]
    pub bus: DiskBus,
    /// Base image for a differencing disk (local backend only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<PathBuf>,
    /// Resolved path or URI. Derived by the storage provisioner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
}

fn default_pool() -> String {
    "local".to_string()
}

/// One network interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicSpec {
    pub bridge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(default = "default_nic_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

fn default_nic_model() -> String {
    "virtio-net-pci".to_string()
}

/// First-boot network configuration handed to the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProvisioningNetwork {
    Dhcp,
    Static {
        /// Address in CIDR notation, e.g. `10.0.0.5/24`.
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        dns: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkSpec {
    #[serde(default)]
    pub nics: Vec<NicSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

/// Optical media and first-boot provisioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BootSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cdroms: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Paths owned by the software TPM side-car.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpmHandles {
    pub state_dir: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
}

/// Identity of a spawned hypervisor process.
///
/// `start_time` is the kernel start time (clock ticks since boot), which
/// disambiguates a recycled pid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub start_time: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayPorts {
    pub display: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<u16>,
}

/// Persisted declaration and observed state of one virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hardware: HardwareSpec,
    pub storage: StorageSpec,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub boot: BootSpec,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_image: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmHandles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayPorts>,
    /// Capabilities lost during the last start (e.g. TPM unavailable).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InstanceRecord {
    /// Optical media take boot priority over the disk only when present.
    #[must_use]
    pub fn boots_from_optical(&self) -> bool {
        !self.boot.cdroms.is_empty()
    }

    /// MAC of the first NIC, used for guest address lookups.
    #[must_use]
    pub fn primary_mac(&self) -> Option<&str> {
        self.network.nics.first().and_then(|n| n.mac.as_deref())
    }

    /// All MAC addresses declared on this record.
    pub fn macs(&self) -> impl Iterator<Item = &str> {
        self.network.nics.iter().filter_map(|n| n.mac.as_deref())
    }

    /// Whether the instance boots from a generated provisioning seed.
    #[must_use]
    pub fn is_seeded(&self) -> bool {
        self.boot.template.is_some()
    }
}

/// Backend-specific connection facts of a storage pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PoolBackend {
    Local {
        path: PathBuf,
    },
    Rbd {
        /// Ceph pool name.
        pool: String,
        monitors: Vec<String>,
        user: String,
        key: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePool {
    pub name: String,
    #[serde(flatten)]
    pub backend: PoolBackend,
}

impl StoragePool {
    #[must_use]
    pub fn kind(&self) -> StorageBackend {
        match self.backend {
            PoolBackend::Local { .. } => StorageBackend::Local,
            PoolBackend::Rbd { .. } => StorageBackend::Rbd,
        }
    }
}

/// First-boot template consumed by the seed builder.
///
/// `user_data` is a cloud-config YAML document whose string values may carry
/// `${USERNAME}`, `${PASSWORD}`, `${SSH_KEY}`, `${HOSTNAME}`, `${FQDN}`
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisioningTemplate {
    pub name: String,
    #[serde(default)]
    pub os_family: OsFamily,
    /// Login created when the instance declares no credentials.
    #[serde(default = "default_user")]
    pub default_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<PathBuf>,
    pub user_data: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
}

fn default_user() -> String {
    "idve".to_string()
}
