//! Hypervisor launch arguments.
//!
//! [`synthesize`] is a pure function: the same record and context always
//! yield the same argument vector. Side effects (spawning, sockets, pid
//! files) live in the supervisor.

use std::path::{Path, PathBuf};

use idve_common::{DiskBus, Firmware, InstanceRecord, Machine, OsFamily};

use crate::domain::instance::{disk_format, effective_bridge};

/// CPU model used when the requested one needs hardware virtualization.
pub const FALLBACK_CPU: &str = "qemu64";

/// CPU models that only work with hardware acceleration.
const ACCEL_ONLY_CPUS: &[&str] = &["host", "max"];

/// Name QEMU's guest agent listens for on the virtio-serial port.
pub const GUEST_AGENT_PORT: &str = "org.qemu.guest_agent.0";

/// Runtime facts the synthesizer needs beyond the record.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Resolved disk path or `rbd:` URI.
    pub disk: String,
    pub seed: Option<PathBuf>,
    /// VNC display number (`-vnc :N`).
    pub display: u16,
    pub keyboard: String,
    /// TPM control socket, set only when the emulator was confirmed alive.
    pub tpm_socket: Option<PathBuf>,
    pub agent_socket: PathBuf,
    pub monitor_socket: PathBuf,
    pub pid_file: PathBuf,
    pub accel: bool,
    pub ovmf_code: PathBuf,
    pub uefi_vars: PathBuf,
}

/// CPU model passed to `-cpu`.
///
/// `host` and `max` are replaced by [`FALLBACK_CPU`] when acceleration is
/// unavailable or the guest OS family is unknown.
#[must_use]
pub fn effective_cpu_model<'a>(requested: &'a str, os_family: OsFamily, accel: bool) -> &'a str {
    let needs_accel = ACCEL_ONLY_CPUS.contains(&requested);
    if needs_accel && (!accel || os_family == OsFamily::Other) {
        FALLBACK_CPU
    } else {
        requested
    }
}

/// Whether the primary disk goes through a SCSI controller.
#[must_use]
pub fn uses_scsi(record: &InstanceRecord) -> bool {
    record.storage.bus == DiskBus::Scsi || record.hardware.os_family == OsFamily::Windows
}

/// Legacy NIC model aliases accepted in records.
fn nic_device_model(model: &str) -> &str {
    match model {
        "virtio" => "virtio-net-pci",
        other => other,
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Build the ordered hypervisor argument list.
#[must_use]
pub fn synthesize(record: &InstanceRecord, ctx: &LaunchContext) -> Vec<String> {
    let hw = &record.hardware;
    let mut args: Vec<String> = Vec::new();
    let mut push = |parts: &[&str]| args.extend(parts.iter().map(|p| (*p).to_string()));

    // Base machine.
    push(&["-name", &record.id]);
    if ctx.accel {
        push(&["-enable-kvm"]);
    }
    push(&["-machine", hw.machine.as_qemu()]);
    push(&["-m", &hw.memory_mib.to_string()]);
    push(&[
        "-smp",
        &format!("sockets={},cores={}", hw.cpu_sockets, hw.cpu_cores),
    ]);
    push(&[
        "-cpu",
        effective_cpu_model(&hw.cpu_model, hw.os_family, ctx.accel),
    ]);

    // Firmware.
    if hw.firmware == Firmware::Uefi {
        push(&[
            "-drive",
            &format!(
                "if=pflash,format=raw,readonly=on,file={}",
                path_arg(&ctx.ovmf_code)
            ),
        ]);
        push(&[
            "-drive",
            &format!("if=pflash,format=raw,file={}", path_arg(&ctx.uefi_vars)),
        ]);
    }

    // Boot priority: optical media first when present, then the disk.
    let disk_bootindex = record.boot.cdroms.len();

    // Primary disk.
    push(&[
        "-drive",
        &format!(
            "file={},if=none,id=drive-disk0,format={},cache=none,discard=unmap",
            ctx.disk,
            disk_format(&ctx.disk)
        ),
    ]);
    if uses_scsi(record) {
        push(&["-device", &format!("{},id=scsi0", hw.scsi_controller)]);
        push(&[
            "-device",
            &format!("scsi-hd,bus=scsi0.0,drive=drive-disk0,id=disk0,bootindex={disk_bootindex}"),
        ]);
    } else {
        push(&[
            "-device",
            &format!("virtio-blk-pci,drive=drive-disk0,id=disk0,bootindex={disk_bootindex}"),
        ]);
    }

    // Seed image.
    if let Some(seed) = &ctx.seed {
        push(&[
            "-drive",
            &format!(
                "file={},if=none,id=drive-seed0,format=raw,readonly=on",
                path_arg(seed)
            ),
        ]);
        push(&["-device", "virtio-blk-pci,drive=drive-seed0,id=seed0"]);
    }

    // Optical media, indexed above the primary disk.
    for (i, iso) in record.boot.cdroms.iter().enumerate() {
        let index = i + 1;
        push(&[
            "-drive",
            &format!(
                "file={},if=none,id=drive-ide{index},media=cdrom,readonly=on",
                path_arg(iso)
            ),
        ]);
        push(&[
            "-device",
            &format!("ide-cd,drive=drive-ide{index},id=ide{index},bootindex={i}"),
        ]);
    }

    // Network.
    if record.network.nics.is_empty() {
        push(&["-netdev", "user,id=net0"]);
        push(&["-device", "virtio-net-pci,netdev=net0,id=nic0"]);
    }
    for (i, nic) in record.network.nics.iter().enumerate() {
        push(&[
            "-netdev",
            &format!("bridge,id=net{i},br={}", effective_bridge(nic)),
        ]);
        let mut device = format!("{},netdev=net{i},id=nic{i}", nic_device_model(&nic.model));
        if let Some(mac) = &nic.mac {
            device.push_str(&format!(",mac={mac}"));
        }
        push(&["-device", &device]);
    }

    // Display.
    push(&["-vga", hw.graphics.as_qemu()]);
    push(&["-vnc", &format!(":{}", ctx.display)]);
    push(&["-k", &ctx.keyboard]);

    // TPM.
    if let Some(socket) = &ctx.tpm_socket {
        push(&[
            "-chardev",
            &format!("socket,id=chrtpm,path={}", path_arg(socket)),
        ]);
        push(&["-tpmdev", "emulator,id=tpm0,chardev=chrtpm"]);
        let model = if hw.machine == Machine::Q35 && hw.firmware == Firmware::Uefi {
            "tpm-crb"
        } else {
            "tpm-tis"
        };
        push(&["-device", &format!("{model},tpmdev=tpm0")]);
    }

    // Guest agent channel.
    if hw.guest_agent {
        push(&["-device", "virtio-serial-pci,id=virtio-serial0"]);
        push(&[
            "-chardev",
            &format!(
                "socket,path={},server=on,wait=off,id=qga0",
                path_arg(&ctx.agent_socket)
            ),
        ]);
        push(&[
            "-device",
            &format!("virtserialport,bus=virtio-serial0.0,chardev=qga0,name={GUEST_AGENT_PORT}"),
        ]);
    }

    if hw.balloon {
        push(&["-device", "virtio-balloon-pci,id=balloon0"]);
    }

    // Supervision.
    push(&[
        "-qmp",
        &format!("unix:{},server=on,wait=off", path_arg(&ctx.monitor_socket)),
    ]);
    push(&["-pidfile", &path_arg(&ctx.pid_file)]);
    push(&["-daemonize"]);

    args
}

/// Render an argument vector as a copy-pasteable shell line.
#[must_use]
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=,.:/@+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
