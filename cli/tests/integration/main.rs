//! Integration tests for the idve CLI
//!
//! These tests spawn the actual binary against a temporary configuration.
//! None of them needs a hypervisor.

mod cli_tests;
mod config_command;
mod instance_commands;
