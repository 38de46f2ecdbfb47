//! Shared test helpers for service tests.
//!
//! Provides `ExitStatus`/`Output` builders and a recording command runner
//! whose replies are chosen by a closure over the program and arguments.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::Result;

use crate::application::ports::{CommandRunner, GuestChannel, HostFs};

/// Build an `ExitStatus` from a logical exit code.
pub fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

pub fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

pub fn fail_output(code: i32, stderr: &str) -> Output {
    Output {
        status: exit_status(code),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

type Reply = Box<dyn Fn(&str, &[&str]) -> Output>;

/// Command runner that records every invocation as one joined line.
pub struct RecordingRunner {
    reply: Reply,
    pub calls: RefCell<Vec<String>>,
    pub monitor_calls: RefCell<Vec<(String, serde_json::Value)>>,
}

impl RecordingRunner {
    pub fn new(reply: impl Fn(&str, &[&str]) -> Output + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: RefCell::new(Vec::new()),
            monitor_calls: RefCell::new(Vec::new()),
        }
    }

    /// Runner on which every command succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_, _| ok_output(b""))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.calls
            .borrow_mut()
            .push(std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" "));
        Ok((self.reply)(program, args))
    }

    async fn run_with_timeout(&self, program: &str, args: &[&str], _: Duration) -> Result<Output> {
        self.run(program, args).await
    }
}

impl GuestChannel for RecordingRunner {
    async fn agent_command(&self, _: &Path, _: &str) -> Result<serde_json::Value> {
        anyhow::bail!("not expected")
    }

    async fn monitor_command(
        &self,
        _: &Path,
        command: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.monitor_calls
            .borrow_mut()
            .push((command.to_string(), arguments));
        Ok(serde_json::json!({}))
    }
}

/// In-memory filesystem. Directories exist once created.
#[derive(Default)]
pub struct MemFs {
    pub files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
    pub dirs: RefCell<BTreeSet<PathBuf>>,
}

impl MemFs {
    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.files
            .borrow_mut()
            .insert(path.into(), contents.as_bytes().to_vec());
        self
    }

    pub fn has(&self, path: impl AsRef<Path>) -> bool {
        self.files.borrow().contains_key(path.as_ref())
    }
}

impl HostFs for MemFs {
    async fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path) || self.dirs.borrow().contains(path)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.dirs.borrow_mut().insert(path.to_path_buf());
        Ok(())
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.files.borrow().get(path) {
            Some(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            None => anyhow::bail!("{}: no such file", path.display()),
        }
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.borrow_mut();
        let Some(bytes) = files.remove(from) else {
            anyhow::bail!("{}: no such file", from.display());
        };
        files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.borrow_mut();
        let Some(bytes) = files.get(from).cloned() else {
            anyhow::bail!("{}: no such file", from.display());
        };
        files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.files.borrow_mut().retain(|p, _| !p.starts_with(path));
        self.dirs.borrow_mut().retain(|p| !p.starts_with(path));
        Ok(())
    }
}

/// Runner and filesystem behind one value, for services that take both.
pub struct TestHost {
    pub runner: RecordingRunner,
    pub fs: MemFs,
}

impl CommandRunner for TestHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.runner.run(program, args).await
    }

    async fn run_with_timeout(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
        self.runner.run_with_timeout(program, args, timeout).await
    }
}

impl HostFs for TestHost {
    async fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path).await
    }
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.fs.create_dir_all(path).await
    }
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        self.fs.read_to_string(path).await
    }
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.fs.write_atomic(path, contents).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs.rename(from, to).await
    }
    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs.copy(from, to).await
    }
    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.fs.remove_file(path).await
    }
    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.fs.remove_dir_all(path).await
    }
}

/// A `/proc/<pid>/stat` line with the given start time.
pub fn proc_stat(pid: u32, start_time: u64) -> String {
    format!(
        "{pid} (qemu-system-x86) S 1 {pid} {pid} 0 -1 4194560 0 0 0 0 0 0 0 0 20 0 4 0 {start_time} 0 0"
    )
}
