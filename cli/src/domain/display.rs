//! Display port derivation.
//!
//! Every instance gets a reproducible VNC display derived from its ID, and a
//! proxy search that starts at the same offset above the proxy base.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Number of distinct display slots.
pub const DISPLAY_SLOTS: u16 = 1000;

/// TCP port of VNC display `:0`.
pub const VNC_PORT_BASE: u16 = 5900;

/// Project an instance ID onto `0..1000`.
///
/// The decimal value of the digits in the ID is used when there are any,
/// so `vm-42` and `demo42` both land on 42. IDs without digits fall back to
/// a 64-bit FNV-1a hash.
#[must_use]
pub fn projection(id: &str) -> u16 {
    let digits: Vec<u32> = id.chars().filter_map(|c| c.to_digit(10)).collect();
    let value = if digits.is_empty() {
        fnv1a(id.as_bytes())
    } else {
        digits
            .iter()
            .fold(0u64, |acc, d| (acc * 10 + u64::from(*d)) % u64::from(DISPLAY_SLOTS))
    };
    // The modulus keeps the value below 1000.
    u16::try_from(value % u64::from(DISPLAY_SLOTS)).unwrap_or(0)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// VNC display number (`-vnc :N`) whose port is [`display_port`].
#[must_use]
pub fn display_number(display_base: u16, id: &str) -> u16 {
    display_base.saturating_sub(VNC_PORT_BASE) + projection(id)
}

/// TCP port the hypervisor's VNC server listens on.
#[must_use]
pub fn display_port(display_base: u16, id: &str) -> u16 {
    display_base + projection(id)
}

/// First port of the proxy search for an instance.
#[must_use]
pub fn proxy_search_start(proxy_base: u16, id: &str) -> u16 {
    proxy_base + projection(id)
}

/// Browser console URL served by the display proxy.
#[must_use]
pub fn console_url(host: &str, proxy_port: u16) -> String {
    format!("http://{host}:{proxy_port}/vnc.html?host={host}&port={proxy_port}&path=&autoconnect=true")
}
