//! Process-table patterns and `/proc` parsing.

/// Pattern matching the hypervisor process of one instance in `pgrep -f`.
///
/// Instance IDs are restricted to `[A-Za-z0-9_-]`, so the ID needs no
/// escaping inside the extended regular expression.
#[must_use]
pub fn hypervisor_pattern(qemu_name: &str, id: &str) -> String {
    format!("{qemu_name}.* -name {id}( |$)")
}

/// Pattern matching the display proxy that forwards to `display_port`.
#[must_use]
pub fn proxy_pattern(websockify: &str, display_port: u16) -> String {
    format!("{websockify}.*localhost:{display_port}( |$)")
}

/// Extract the kernel start time (field 22) from `/proc/<pid>/stat`.
///
/// The command name in field 2 may contain spaces or parentheses, so fields
/// are counted from the last `)`.
#[must_use]
pub fn parse_stat_start_time(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // Field 3 (state) is the first one after the command name.
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

/// Parse the pids printed by `pgrep`, one per line.
#[must_use]
pub fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Parse a pid file written by QEMU or swtpm.
#[must_use]
pub fn parse_pid_file(content: &str) -> Option<u32> {
    content.trim().parse().ok()
}
