//! The production host: process runner, filesystem, port probe, and socket
//! channel behind one value that satisfies the `Host` port.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::application::ports::{CommandRunner, GuestChannel, HostFs, PortProbe};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::fs::LocalFs;
use crate::infra::network::TcpPortProbe;
use crate::infra::qmp::SocketChannel;

pub struct LocalHost {
    runner: TokioCommandRunner,
    fs: LocalFs,
    probe: TcpPortProbe,
    channel: SocketChannel,
}

impl LocalHost {
    #[must_use]
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            runner: TokioCommandRunner::new(command_timeout),
            fs: LocalFs,
            probe: TcpPortProbe,
            channel: SocketChannel::new(),
        }
    }
}

impl CommandRunner for LocalHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.runner.run(program, args).await
    }

    async fn run_with_timeout(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
        self.runner.run_with_timeout(program, args, timeout).await
    }
}

impl HostFs for LocalHost {
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

impl PortProbe for LocalHost {
    async fn is_free(&self, port: u16) -> bool {
        self.probe.is_free(port).await
    }
}

impl GuestChannel for LocalHost {
    async fn agent_command(&self, socket: &Path, command: &str) -> Result<Value> {
        self.channel.agent_command(socket, command).await
    }

    async fn monitor_command(&self, socket: &Path, command: &str, arguments: Value) -> Result<Value> {
        self.channel.monitor_command(socket, command, arguments).await
    }
}
