//! Output formatting module

pub mod human;
pub mod json;
pub mod reporter;
pub mod styles;

use std::net::IpAddr;
use std::path::Path;

use anyhow::Result;
use console::Term;
use idve_common::{InstanceRecord, ProvisioningTemplate};
use owo_colors::OwoColorize as _;
pub use styles::Styles;

pub use human::HumanRenderer;
pub use json::JsonRenderer;

use crate::application::{ConsoleInfo, CreateOutcome, StartOutcome, StatusReport};
use crate::domain::IdveConfig;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {:<14} {value}", key.style(self.styles.dim));
        }
    }
}

/// Dispatches rendering to the human or JSON renderer.
pub enum Renderer<'a> {
    Human(HumanRenderer<'a>),
    Json(JsonRenderer),
}

impl Renderer<'_> {
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_created(&self, outcome: &CreateOutcome) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_record(&outcome.record);
                if let Some(start) = &outcome.start {
                    r.render_started(start);
                }
                Ok(())
            }
            Self::Json(r) => r.print(outcome),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_record(&self, record: &InstanceRecord) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_record(record);
                Ok(())
            }
            Self::Json(r) => r.print(record),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_started(&self, outcome: &StartOutcome) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_started(outcome);
                Ok(())
            }
            Self::Json(r) => r.print(outcome),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_status(&self, report: &StatusReport) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_status(report);
                Ok(())
            }
            Self::Json(r) => r.print(report),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_status_list(&self, reports: &[StatusReport]) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_status_list(reports);
                Ok(())
            }
            Self::Json(r) => r.print(&reports),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_console(&self, console: &ConsoleInfo) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_console(console);
                Ok(())
            }
            Self::Json(r) => r.print(console),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_address(&self, id: &str, address: Option<IpAddr>) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_address(address);
                Ok(())
            }
            Self::Json(r) => r.print(&serde_json::json!({ "id": id, "address": address })),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_command(&self, program: &str, args: &[String]) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_command(program, args);
                Ok(())
            }
            Self::Json(r) => r.print(&serde_json::json!({ "program": program, "args": args })),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_templates(&self, templates: &[ProvisioningTemplate]) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_templates(templates);
                Ok(())
            }
            Self::Json(r) => r.print(&templates),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_config(&self, config: &IdveConfig, path: &Path) -> Result<()> {
        match self {
            Self::Human(r) => r.render_config(config, path),
            Self::Json(r) => r.print(&serde_json::json!({
                "path": path,
                "config": config,
            })),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_config_path(&self, path: &Path) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_config_path(path);
                Ok(())
            }
            Self::Json(r) => r.print(&serde_json::json!({ "path": path })),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_version(&self, version: &str) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_version(version);
                Ok(())
            }
            Self::Json(r) => r.print(&serde_json::json!({ "version": version })),
        }
    }

    /// Confirmation of a command that produces no other output.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_done(&self, id: &str, action: &str) -> Result<()> {
        match self {
            Self::Human(_) => Ok(()),
            Self::Json(r) => r.print(&serde_json::json!({ "id": id, "action": action, "ok": true })),
        }
    }
}
