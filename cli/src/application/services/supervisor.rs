//! Process supervisor: the hypervisor, the TPM emulator, and the display proxy.
//!
//! Liveness always comes from the OS. A persisted [`ProcessHandle`] is
//! trusted only while `/proc/<pid>/stat` reports the same start time; the
//! process table is scanned with `pgrep -f` only to recover a missing or
//! stale handle.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use idve_common::{InstanceRecord, ProcessHandle, TpmHandles};

use crate::application::ports::{CommandRunner, HostFs};
use crate::application::services::failure_detail;
use crate::domain::InstanceError;
use crate::domain::config::IdveConfig;
use crate::domain::process::{
    hypervisor_pattern, parse_pid_file, parse_pids, parse_stat_start_time, proxy_pattern,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn stat_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/stat"))
}

/// Read the current handle of `pid`, or `None` if no such process exists.
pub async fn read_handle(fs: &impl HostFs, pid: u32) -> Option<ProcessHandle> {
    let stat = fs.read_to_string(&stat_path(pid)).await.ok()?;
    parse_stat_start_time(&stat).map(|start_time| ProcessHandle { pid, start_time })
}

/// Whether the process behind `handle` is still the one we started.
pub async fn is_alive(fs: &impl HostFs, handle: &ProcessHandle) -> bool {
    read_handle(fs, handle.pid)
        .await
        .is_some_and(|current| current.start_time == handle.start_time)
}

/// Pids whose command line matches `pattern`.
///
/// `pgrep` exits with 1 when nothing matches; that is an empty result.
async fn pgrep(runner: &impl CommandRunner, cfg: &IdveConfig, pattern: &str) -> Result<Vec<u32>> {
    let output = runner
        .run_with_timeout(&cfg.binaries.pgrep, &["-f", pattern], PROBE_TIMEOUT)
        .await?;
    match output.status.code() {
        Some(0) => Ok(parse_pids(&String::from_utf8_lossy(&output.stdout))),
        Some(1) => Ok(Vec::new()),
        _ => anyhow::bail!(failure_detail(&cfg.binaries.pgrep, &output)),
    }
}

/// Locate the live hypervisor process of an instance.
///
/// # Errors
///
/// Returns an error only when the process table cannot be scanned.
pub async fn find_hypervisor(
    host: &(impl CommandRunner + HostFs),
    cfg: &IdveConfig,
    record: &InstanceRecord,
) -> Result<Option<ProcessHandle>> {
    if let Some(handle) = &record.process {
        if is_alive(host, handle).await {
            return Ok(Some(*handle));
        }
        tracing::debug!(instance = %record.id, pid = handle.pid, "stored process handle is stale");
    }
    let pattern = hypervisor_pattern(cfg.binaries.qemu_name(), &record.id);
    for pid in pgrep(host, cfg, &pattern).await? {
        if let Some(handle) = read_handle(host, pid).await {
            tracing::debug!(instance = %record.id, pid, "recovered process handle from process table");
            return Ok(Some(handle));
        }
    }
    Ok(None)
}

/// Spawn the hypervisor with `args` and return its handle.
///
/// The hypervisor daemonizes and writes `pid_file` once the guest is set
/// up, so a zero exit means the process is running.
///
/// # Errors
///
/// Returns `InstanceError::Launch` if the hypervisor exits non-zero or no
/// process can be found afterwards.
pub async fn spawn_hypervisor(
    host: &(impl CommandRunner + HostFs),
    cfg: &IdveConfig,
    record: &InstanceRecord,
    args: &[String],
) -> Result<ProcessHandle> {
    let pid_file = cfg.paths.pid_file(&record.id);
    host.create_dir_all(&cfg.paths.run_dir).await?;
    host.remove_file(&pid_file).await?;

    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    tracing::debug!(instance = %record.id, program = %cfg.binaries.qemu, ?argv, "spawning hypervisor");
    let output = host
        .run(&cfg.binaries.qemu, &argv)
        .await
        .map_err(|e| InstanceError::Launch(format!("{e:#}")))?;
    if !output.status.success() {
        return Err(InstanceError::Launch(failure_detail(&cfg.binaries.qemu, &output)).into());
    }

    let from_pid_file = match host.read_to_string(&pid_file).await {
        Ok(content) => match parse_pid_file(&content) {
            Some(pid) => read_handle(host, pid).await,
            None => None,
        },
        Err(_) => None,
    };
    let handle = match from_pid_file {
        Some(handle) => Some(handle),
        None => {
            let probe = InstanceRecord {
                process: None,
                ..record.clone()
            };
            find_hypervisor(host, cfg, &probe).await?
        }
    };
    let handle = handle.ok_or_else(|| {
        InstanceError::Launch(format!("{} exited right after start", cfg.binaries.qemu))
    })?;
    tracing::info!(instance = %record.id, pid = handle.pid, "hypervisor started");
    Ok(handle)
}

/// Signal the hypervisor and wait for it to exit.
///
/// Sends `TERM`, then `KILL` after `stop_wait_ms`. A process that vanished
/// before it could be signalled counts as stopped. Returns whether a process
/// was found.
///
/// # Errors
///
/// Returns `InstanceError::StillRunning` if the process survives `KILL`.
pub async fn stop_hypervisor(
    host: &(impl CommandRunner + HostFs),
    cfg: &IdveConfig,
    record: &InstanceRecord,
) -> Result<bool> {
    let Some(handle) = find_hypervisor(host, cfg, record).await? else {
        return Ok(false);
    };
    let pid = handle.pid.to_string();
    let patience = Duration::from_millis(cfg.hypervisor.stop_wait_ms);

    for (signal, wait) in [("-TERM", patience), ("-KILL", Duration::from_secs(2))] {
        tracing::info!(instance = %record.id, pid = handle.pid, signal, "signalling hypervisor");
        let output = host.run(&cfg.binaries.kill, &[signal, &pid]).await?;
        if !output.status.success() {
            // Usually "no such process": it exited between lookup and signal.
            tracing::debug!(detail = %failure_detail(&cfg.binaries.kill, &output), "kill failed");
        }
        if wait_for_exit(host, &handle, wait).await {
            return Ok(true);
        }
    }
    Err(InstanceError::StillRunning(record.id.clone()).into())
}

async fn wait_for_exit(fs: &impl HostFs, handle: &ProcessHandle, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !is_alive(fs, handle).await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Start the software TPM emulator and wait for its control socket.
///
/// # Errors
///
/// Returns an error if `swtpm` fails or the socket does not appear within
/// `tpm_wait_ms`. Callers degrade to a start without TPM.
pub async fn start_tpm(
    host: &(impl CommandRunner + HostFs),
    cfg: &IdveConfig,
    handles: &TpmHandles,
) -> Result<()> {
    host.create_dir_all(&handles.state_dir).await?;
    host.remove_file(&handles.socket).await?;

    let tpmstate = format!("dir={},mode=0600", handles.state_dir.display());
    let ctrl = format!("type=unixio,path={},mode=0600", handles.socket.display());
    let pid = format!("file={}", handles.pid_file.display());
    let args: [&str; 9] = [
        "socket",
        "--tpm2",
        "--tpmstate",
        &tpmstate,
        "--ctrl",
        &ctrl,
        "--pid",
        &pid,
        "--daemon",
    ];
    tracing::debug!(program = %cfg.binaries.swtpm, ?args, "starting tpm emulator");
    let output = host.run(&cfg.binaries.swtpm, &args).await?;
    if !output.status.success() {
        anyhow::bail!(failure_detail(&cfg.binaries.swtpm, &output));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_millis(cfg.hypervisor.tpm_wait_ms);
    while !host.exists(&handles.socket).await {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "TPM control socket {} did not appear within {}ms",
                handles.socket.display(),
                cfg.hypervisor.tpm_wait_ms
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

/// Stop the TPM emulator via its pid file and remove its runtime files.
///
/// # Errors
///
/// Returns an error if the runtime files cannot be removed.
pub async fn stop_tpm(
    host: &(impl CommandRunner + HostFs),
    cfg: &IdveConfig,
    handles: &TpmHandles,
) -> Result<()> {
    if let Some(pid) = host
        .read_to_string(&handles.pid_file)
        .await
        .ok()
        .as_deref()
        .and_then(parse_pid_file)
    {
        let pid = pid.to_string();
        match host.run(&cfg.binaries.kill, &["-TERM", &pid]).await {
            Ok(out) if !out.status.success() => {
                tracing::debug!(detail = %failure_detail(&cfg.binaries.kill, &out), "tpm emulator already gone");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not signal tpm emulator"),
        }
    }
    host.remove_file(&handles.pid_file).await?;
    host.remove_file(&handles.socket).await?;
    Ok(())
}

/// Start `websockify` forwarding `proxy_port` to the VNC server.
///
/// # Errors
///
/// Returns an error if `websockify` fails to daemonize.
pub async fn start_proxy(
    runner: &impl CommandRunner,
    cfg: &IdveConfig,
    display_port: u16,
    proxy_port: u16,
) -> Result<()> {
    let listen = proxy_port.to_string();
    let target = format!("localhost:{display_port}");
    let output = runner
        .run(&cfg.binaries.websockify, &["--daemon", &listen, &target])
        .await?;
    if !output.status.success() {
        anyhow::bail!(failure_detail(&cfg.binaries.websockify, &output));
    }
    tracing::info!(display_port, proxy_port, "display proxy started");
    Ok(())
}

/// Kill every display proxy forwarding to `display_port`.
///
/// # Errors
///
/// Returns an error if `pkill` cannot be run.
pub async fn stop_proxy(runner: &impl CommandRunner, cfg: &IdveConfig, display_port: u16) -> Result<()> {
    let pattern = proxy_pattern(&cfg.binaries.websockify, display_port);
    let output = runner
        .run_with_timeout(&cfg.binaries.pkill, &["-f", &pattern], PROBE_TIMEOUT)
        .await
        .context("stopping display proxy")?;
    // pkill exits 1 when nothing matched.
    if !matches!(output.status.code(), Some(0 | 1)) {
        anyhow::bail!(failure_detail(&cfg.binaries.pkill, &output));
    }
    Ok(())
}

/// Remove sockets and pid files left by a stopped hypervisor.
///
/// # Errors
///
/// Returns an error if a file exists but cannot be removed.
pub async fn remove_runtime_files(fs: &impl HostFs, cfg: &IdveConfig, id: &str) -> Result<()> {
    for path in cfg.paths.runtime_files(id) {
        fs.remove_file(&path).await?;
    }
    Ok(())
}
