//! Human-readable terminal renderer.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use idve_common::{InstanceRecord, InstanceStatus, ProvisioningTemplate};
use owo_colors::OwoColorize as _;

use crate::application::{ConsoleInfo, StartOutcome, StatusReport};
use crate::domain::IdveConfig;
use crate::domain::launch::render_command;
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    fn status_text(&self, status: InstanceStatus) -> String {
        let style = match status {
            InstanceStatus::Running => self.ctx.styles.success,
            InstanceStatus::Error => self.ctx.styles.error,
            InstanceStatus::Created | InstanceStatus::Stopped => self.ctx.styles.dim,
        };
        status.as_str().style(style).to_string()
    }

    pub fn render_record(&self, record: &InstanceRecord) {
        if self.ctx.quiet {
            return;
        }
        let hw = &record.hardware;
        self.ctx.header(&format!("{} ({})", record.id, record.name));
        self.ctx.kv("status:", &self.status_text(record.status));
        self.ctx.kv(
            "cpu:",
            &format!("{} x {} ({})", hw.cpu_sockets, hw.cpu_cores, hw.cpu_model),
        );
        self.ctx.kv("memory:", &format!("{} MiB", hw.memory_mib));
        self.ctx.kv(
            "disk:",
            &format!(
                "{} GiB on {} ({})",
                record.storage.size_gib,
                record.storage.pool,
                record.storage.disk.as_deref().unwrap_or("not provisioned")
            ),
        );
        for (i, nic) in record.network.nics.iter().enumerate() {
            let vlan = nic.vlan.map(|v| format!(" vlan {v}")).unwrap_or_default();
            self.ctx.kv(
                &format!("nic{i}:"),
                &format!(
                    "{} on {}{vlan}",
                    nic.mac.as_deref().unwrap_or("-"),
                    nic.bridge
                ),
            );
        }
        if let Some(template) = &record.boot.template {
            self.ctx.kv("template:", template);
        }
        for warning in &record.warnings {
            self.ctx.warn(warning);
        }
    }

    pub fn render_started(&self, outcome: &StartOutcome) {
        if self.ctx.quiet {
            return;
        }
        let record = &outcome.record;
        if let Some(process) = &record.process {
            self.ctx.kv("pid:", &process.pid.to_string());
        }
        if let Some(display) = &record.display {
            self.ctx.kv("vnc port:", &display.display.to_string());
            match display.proxy {
                Some(proxy) => self.ctx.kv("web console:", &proxy.to_string()),
                None => self.ctx.kv("web console:", "unavailable"),
            }
        }
    }

    pub fn render_status(&self, report: &StatusReport) {
        if self.ctx.quiet {
            return;
        }
        self.ctx.header(&report.id);
        self.ctx.kv("status:", &self.status_text(report.status));
        if report.recorded != report.status {
            self.ctx.kv("recorded:", report.recorded.as_str());
        }
        if let Some(pid) = report.pid {
            self.ctx.kv("pid:", &pid.to_string());
        }
        if let Some(port) = report.display_port {
            self.ctx.kv("vnc port:", &port.to_string());
        }
        if let Some(port) = report.proxy_port {
            self.ctx.kv("web console:", &port.to_string());
        }
        if report.status == InstanceStatus::Running {
            let address = report
                .address
                .map_or_else(|| "unknown".to_string(), |a| a.to_string());
            self.ctx.kv("address:", &address);
        }
        for warning in &report.warnings {
            self.ctx.warn(warning);
        }
    }

    pub fn render_status_list(&self, reports: &[StatusReport]) {
        if reports.is_empty() {
            if !self.ctx.quiet {
                println!("No instances. Create one: idve create --file <declaration>");
            }
            return;
        }
        println!(
            "  {}",
            format!("{:<24} {:<9} {:<8} {:<6} {}", "ID", "STATUS", "PID", "VNC", "ADDRESS")
                .style(self.ctx.styles.bold)
        );
        for report in reports {
            let status = format!("{:<9}", report.status.as_str());
            let status = match report.status {
                InstanceStatus::Running => status.style(self.ctx.styles.success).to_string(),
                _ => status.style(self.ctx.styles.dim).to_string(),
            };
            println!(
                "  {:<24} {status} {:<8} {:<6} {}",
                report.id,
                report.pid.map(|p| p.to_string()).unwrap_or_default(),
                report.display_port.map(|p| p.to_string()).unwrap_or_default(),
                report.address.map(|a| a.to_string()).unwrap_or_default(),
            );
        }
    }

    pub fn render_console(&self, console: &ConsoleInfo) {
        if self.ctx.quiet {
            return;
        }
        self.ctx.kv("vnc:", &format!(":{} (port {})", console.vnc_display, console.display_port));
        match &console.url {
            Some(url) => self.ctx.kv("web console:", url),
            None if console.running => self.ctx.warn("web console proxy is not running"),
            None => self.ctx.info(&format!("{} is not running", console.id)),
        }
    }

    pub fn render_address(&self, address: Option<IpAddr>) {
        match address {
            Some(address) => println!("{address}"),
            None => self.ctx.warn("address unknown"),
        }
    }

    /// The launch command is printed even when quiet, since it is the
    /// command's whole output.
    pub fn render_command(&self, program: &str, args: &[String]) {
        println!("{}", render_command(program, args));
    }

    pub fn render_templates(&self, templates: &[ProvisioningTemplate]) {
        for template in templates {
            let base = template
                .base_image
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!(
                "  {:<16} {:<8} {:<10} {base}",
                template.name,
                format!("{:?}", template.os_family).to_lowercase(),
                template.default_user,
            );
        }
    }

    /// Render the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn render_config(&self, config: &IdveConfig, path: &Path) -> Result<()> {
        println!();
        println!(
            "  {}",
            format!("Configuration ({})", path.display()).style(self.ctx.styles.header)
        );
        println!();
        let yaml = serde_yaml::to_string(config).context("cannot serialize config")?;
        for line in yaml.lines() {
            println!("  {line}");
        }
        println!();
        println!("  {}", "Environment:".style(self.ctx.styles.bold));
        println!(
            "    {:<18} {}",
            "IDVE_CONFIG:",
            std::env::var("IDVE_CONFIG").unwrap_or_else(|_| "(not set)".to_string())
        );
        println!(
            "    {:<18} {}",
            "RUST_LOG:",
            std::env::var("RUST_LOG").unwrap_or_else(|_| "(not set)".to_string())
        );
        Ok(())
    }

    pub fn render_config_path(&self, path: &Path) {
        println!("{}", path.display());
    }

    pub fn render_version(&self, version: &str) {
        println!("idve {version}");
    }
}
