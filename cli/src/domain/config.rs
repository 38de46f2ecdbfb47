//! Orchestrator configuration types and path layout.
//!
//! Every field is defaulted so an absent or partial `config.yaml` yields a
//! working host layout.

use std::path::{Path, PathBuf};

use idve_common::TpmHandles;
use serde::{Deserialize, Serialize};

use crate::domain::display::VNC_PORT_BASE;
use crate::domain::error::ConfigError;

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdveConfig {
    pub paths: PathsConfig,
    pub binaries: BinariesConfig,
    pub display: DisplayConfig,
    pub hypervisor: HypervisorConfig,
    pub network: NetworkConfig,
}

impl IdveConfig {
    /// Reject values that would make port arithmetic or probing impossible.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let span = u32::from(self.display.proxy_attempts) + 999;
        if self.display.display_base < VNC_PORT_BASE {
            return Err(ConfigError::InvalidValue {
                key: "display.display_base",
                reason: format!("must be at least {VNC_PORT_BASE}"),
            });
        }
        if u32::from(self.display.display_base) + 999 > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidValue {
                key: "display.display_base",
                reason: format!("{} leaves no room for 1000 displays", self.display.display_base),
            });
        }
        if u32::from(self.display.proxy_base) + span > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidValue {
                key: "display.proxy_base",
                reason: format!("{} overflows the port range", self.display.proxy_base),
            });
        }
        if self.display.proxy_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "display.proxy_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.display.keyboard.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "display.keyboard",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Host directories and registry files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Instance records, one `<id>.json` per instance.
    pub state_dir: PathBuf,
    /// Seed artifacts, `<seed_dir>/<id>/`.
    pub seed_dir: PathBuf,
    /// Sockets and pid files of running instances.
    pub run_dir: PathBuf,
    /// Software TPM state, `<tpm_dir>/<id>/`.
    pub tpm_dir: PathBuf,
    /// Per-instance UEFI variable stores.
    pub nvram_dir: PathBuf,
    pub pools_file: PathBuf,
    pub templates_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/etc/idve"),
            seed_dir: PathBuf::from("/var/lib/idve/cloudinit"),
            run_dir: PathBuf::from("/run/idve"),
            tpm_dir: PathBuf::from("/var/lib/idve/tpm"),
            nvram_dir: PathBuf::from("/var/lib/idve/nvram"),
            pools_file: PathBuf::from("/etc/idve/pools.yaml"),
            templates_file: PathBuf::from("/etc/idve/templates.yaml"),
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn record_file(&self, id: &str) -> PathBuf {
        self.state_dir.join(format!("{id}.json"))
    }

    #[must_use]
    pub fn seed_dir_for(&self, id: &str) -> PathBuf {
        self.seed_dir.join(id)
    }

    #[must_use]
    pub fn monitor_socket(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.qmp"))
    }

    #[must_use]
    pub fn agent_socket(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.qga"))
    }

    #[must_use]
    pub fn pid_file(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.pid"))
    }

    #[must_use]
    pub fn uefi_vars(&self, id: &str) -> PathBuf {
        self.nvram_dir.join(format!("{id}_VARS.fd"))
    }

    #[must_use]
    pub fn tpm_handles(&self, id: &str) -> TpmHandles {
        let state_dir = self.tpm_dir.join(id);
        TpmHandles {
            socket: state_dir.join("swtpm.sock"),
            pid_file: state_dir.join("swtpm.pid"),
            state_dir,
        }
    }

    /// Every runtime file an instance may leave behind.
    #[must_use]
    pub fn runtime_files(&self, id: &str) -> Vec<PathBuf> {
        vec![
            self.monitor_socket(id),
            self.agent_socket(id),
            self.pid_file(id),
        ]
    }
}

/// External programs, overridable for non-standard installs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BinariesConfig {
    pub qemu: String,
    pub qemu_img: String,
    pub rbd: String,
    pub genisoimage: String,
    pub mkisofs: String,
    pub swtpm: String,
    pub websockify: String,
    pub pgrep: String,
    pub pkill: String,
    pub kill: String,
    pub ip: String,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            qemu: "qemu-system-x86_64".to_string(),
            qemu_img: "qemu-img".to_string(),
            rbd: "rbd".to_string(),
            genisoimage: "genisoimage".to_string(),
            mkisofs: "mkisofs".to_string(),
            swtpm: "swtpm".to_string(),
            websockify: "websockify".to_string(),
            pgrep: "pgrep".to_string(),
            pkill: "pkill".to_string(),
            kill: "kill".to_string(),
            ip: "ip".to_string(),
        }
    }
}

impl BinariesConfig {
    /// File name of the hypervisor binary, used in process-table patterns.
    #[must_use]
    pub fn qemu_name(&self) -> &str {
        Path::new(&self.qemu)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.qemu)
    }
}

/// Remote display settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    pub display_base: u16,
    pub proxy_base: u16,
    pub proxy_attempts: u16,
    pub keyboard: String,
    /// Host name used in console URLs.
    pub console_host: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display_base: 5900,
            proxy_base: 7900,
            proxy_attempts: 10,
            keyboard: "en-us".to_string(),
            console_host: "localhost".to_string(),
        }
    }
}

/// Hypervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Whether hardware acceleration (KVM) is available on this host.
    pub accel: bool,
    pub ovmf_code: PathBuf,
    pub ovmf_vars_template: PathBuf,
    /// Upper bound on waiting for the TPM control socket.
    pub tpm_wait_ms: u64,
    /// Upper bound on waiting for the hypervisor to exit after a signal.
    pub stop_wait_ms: u64,
    /// Timeout for one external command.
    pub command_timeout_secs: u64,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            accel: true,
            ovmf_code: PathBuf::from("/usr/share/OVMF/OVMF_CODE.fd"),
            ovmf_vars_template: PathBuf::from("/usr/share/OVMF/OVMF_VARS.fd"),
            tpm_wait_ms: 5000,
            stop_wait_ms: 10_000,
            command_timeout_secs: 120,
        }
    }
}

/// Network discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// dnsmasq lease files consulted by the address resolver.
    pub lease_files: Vec<PathBuf>,
    /// Reject NICs naming bridges absent from `ip link`.
    pub validate_bridges: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lease_files: vec![
                PathBuf::from("/var/lib/misc/dnsmasq.leases"),
                PathBuf::from("/var/lib/dnsmasq/dnsmasq.leases"),
            ],
            validate_bridges: true,
        }
    }
}
