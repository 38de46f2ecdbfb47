//! Application context: unified state passed to every command handler.
//!
//! `AppContext` owns the output settings and the configuration location.
//! Commands that touch instances build an [`Orchestrator`] from it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::application::ports::{ConfigStore, SilentReporter};
use crate::application::Orchestrator;
use crate::domain::IdveConfig;
use crate::infra::config::YamlConfigStore;
use crate::infra::host::LocalHost;
use crate::infra::registry::YamlRegistry;
use crate::infra::store::JsonInstanceStore;
use crate::output::reporter::{CommandReporter, TerminalReporter};
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer};

/// Orchestrator wired to the local host and on-disk state.
pub type LocalOrchestrator = Orchestrator<LocalHost, JsonInstanceStore, YamlRegistry>;

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `IDVE_YES` env vars).
    pub yes: bool,
    /// Explicit configuration file, overriding `IDVE_CONFIG`.
    pub config: Option<PathBuf>,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Behaviour options.
    pub behaviour: BehaviourFlags,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Where the configuration is read from.
    pub config_store: YamlConfigStore,
    /// When `true`, skip interactive prompts and use defaults.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: &AppFlags) -> Self {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("IDVE_YES").is_ok();
        let non_interactive = flags.behaviour.yes || ci_env;

        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config_store: YamlConfigStore::new(flags.behaviour.config.clone()),
            non_interactive,
        }
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Progress reporter for long-running operations. Silent in JSON mode so
    /// stdout stays machine-readable.
    #[must_use]
    pub fn reporter(&self) -> CommandReporter<'_> {
        match self.mode {
            OutputMode::Human => CommandReporter::Terminal(TerminalReporter::new(&self.output)),
            OutputMode::Json => CommandReporter::Silent(SilentReporter),
        }
    }

    /// Load and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but is invalid.
    pub fn config(&self) -> Result<IdveConfig> {
        self.config_store.load()
    }

    /// Build the orchestrator for the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn orchestrator(&self) -> Result<LocalOrchestrator> {
        let config = self.config()?;
        let host = LocalHost::new(Duration::from_secs(config.hypervisor.command_timeout_secs));
        let store = JsonInstanceStore::new(config.paths.state_dir.clone());
        let registry = YamlRegistry::new(
            config.paths.pools_file.clone(),
            config.paths.templates_file.clone(),
        );
        tracing::debug!(state_dir = %config.paths.state_dir.display(), "orchestrator ready");
        Ok(Orchestrator::new(host, store, registry, config))
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `IDVE_YES` env),
    /// returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
