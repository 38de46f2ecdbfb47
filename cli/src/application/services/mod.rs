//! Application services: use-case orchestration.
//!
//! Each service module implements one concern by composing domain logic with
//! port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra`, `crate::commands`,
//! or `crate::output`.

pub mod address;
pub mod display;
pub mod lifecycle;
pub mod locks;
pub mod seed;
pub mod storage;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

use std::process::Output;

/// Short description of a failed command for error messages.
pub(crate) fn failure_detail(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    match (output.status.code(), stderr.is_empty()) {
        (Some(code), true) => format!("{program} exited with code {code}"),
        (Some(code), false) => format!("{program} exited with code {code}: {stderr}"),
        (None, _) => format!("{program} was terminated by a signal"),
    }
}
