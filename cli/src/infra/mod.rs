//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution,
//! filesystem access, port probing, monitor and guest agent sockets, and the
//! YAML/JSON stores.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod command_runner;
pub mod config;
pub mod fs;
pub mod host;
pub mod network;
pub mod qmp;
pub mod registry;
pub mod store;
