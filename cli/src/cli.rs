//! CLI argument parsing with clap derive

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, OutputFlags};
use crate::commands;

/// Single-host QEMU instance lifecycle orchestrator
#[derive(Parser)]
#[command(
    name = "idve",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output (any non-empty `NO_COLOR` value counts)
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Log debug detail to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Configuration file (default: $IDVE_CONFIG or /etc/idve/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an instance from a declaration file
    Create(commands::create::CreateArgs),

    /// Change an instance's declaration
    Update(commands::update::UpdateArgs),

    /// Start an instance
    Start(commands::InstanceArgs),

    /// Stop an instance
    Stop(commands::InstanceArgs),

    /// Show observed status of one or all instances
    Status(commands::status::StatusArgs),

    /// List all instances
    List,

    /// Stop an instance and remove everything it owns
    Delete(commands::InstanceArgs),

    /// Grow an instance's primary disk
    Resize(commands::resize::ResizeArgs),

    /// Show remote display endpoints
    Console(commands::InstanceArgs),

    /// Show the guest's IP address
    Address(commands::InstanceArgs),

    /// Print the hypervisor command line without launching
    Command(commands::InstanceArgs),

    /// List provisioning templates
    Templates,

    /// Show configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            verbose: _,
            yes,
            config,
            command,
        } = self;
        let app = AppContext::new(&AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            behaviour: BehaviourFlags { yes, config },
        });

        match command {
            Command::Create(args) => commands::create::run(&app, &args).await,
            Command::Update(args) => commands::update::run(&app, &args).await,
            Command::Start(args) => commands::start::run(&app, &args.id).await,
            Command::Stop(args) => commands::stop::run(&app, &args.id).await,
            Command::Status(args) => commands::status::run(&app, args.id.as_deref()).await,
            Command::List => commands::status::run(&app, None).await,
            Command::Delete(args) => commands::delete::run(&app, &args.id).await,
            Command::Resize(args) => commands::resize::run(&app, &args).await,
            Command::Console(args) => commands::console::run(&app, &args.id).await,
            Command::Address(args) => commands::address::run(&app, &args.id).await,
            Command::Command(args) => commands::command::run(&app, &args.id).await,
            Command::Templates => commands::templates::run(&app).await,
            Command::Config(cmd) => commands::config::run(&app, &cmd),
            Command::Version => commands::version::run(&app),
        }
    }
}
