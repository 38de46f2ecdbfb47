//! Domain layer: pure business logic, types, and validation.
//!
//! Nothing here spawns processes, touches the filesystem, or opens sockets.
//! Functions take data in and return data out, so every rule is unit-tested
//! without a host.

pub mod config;
pub mod display;
pub mod error;
pub mod instance;
pub mod launch;
pub mod network;
pub mod process;
pub mod seed;

pub use config::IdveConfig;
pub use error::{ConfigError, ErrorKind, InstanceError};
