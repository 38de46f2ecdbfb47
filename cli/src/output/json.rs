//! JSON output helpers.
//!
//! Every `--json` success path prints one pretty-printed document to stdout;
//! failures print the error object from [`format_error`].

use anyhow::{Context, Result};
use serde::Serialize;

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// `code` is one of `not_found`, `conflict`, `provisioning_failure`,
/// `launch_failure`, `invalid`, or `internal`.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Machine-readable renderer.
pub struct JsonRenderer;

impl JsonRenderer {
    /// Print `value` as pretty JSON on stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn print(&self, value: &impl Serialize) -> Result<()> {
        let out = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
        println!("{out}");
        Ok(())
    }
}
