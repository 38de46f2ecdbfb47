//! Instance identity, MAC addressing, disk handles, and record updates.

use std::collections::HashSet;
use std::path::Path;

use idve_common::{HardwareSpec, InstanceRecord, NicSpec, PoolBackend};
use rand::Rng;

use crate::domain::error::InstanceError;

/// QEMU's locally administered OUI.
pub const MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// Validate an instance ID.
///
/// 1 to 64 characters of `[A-Za-z0-9_-]`, first character alphanumeric. The
/// ID becomes a file name, a process-table pattern, and part of a storage
/// URI, so nothing else is accepted.
///
/// # Errors
///
/// Returns `InstanceError::InvalidId` if the ID does not match.
pub fn validate_instance_id(id: &str) -> Result<(), InstanceError> {
    let mut chars = id.chars();
    let valid = id.len() <= 64
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(InstanceError::InvalidId(id.to_string()))
    }
}

/// Smallest memory size accepted for a guest.
pub const MIN_MEMORY_MIB: u64 = 64;

/// Reject hardware declarations QEMU cannot start.
///
/// # Errors
///
/// Returns `InstanceError::InvalidDeclaration` naming the offending field.
pub fn validate_hardware(hw: &HardwareSpec) -> Result<(), InstanceError> {
    if hw.cpu_sockets == 0 || hw.cpu_cores == 0 {
        return Err(InstanceError::InvalidDeclaration(
            "cpu sockets and cores must be at least 1".to_string(),
        ));
    }
    if hw.memory_mib < MIN_MEMORY_MIB {
        return Err(InstanceError::InvalidDeclaration(format!(
            "memory must be at least {MIN_MEMORY_MIB} MiB"
        )));
    }
    if hw.cpu_model.trim().is_empty() {
        return Err(InstanceError::InvalidDeclaration(
            "cpu model must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Normalize a MAC address to lowercase colon form and reject multicast.
///
/// # Errors
///
/// Returns `InstanceError::InvalidMac` for malformed or multicast addresses.
pub fn normalize_mac(mac: &str) -> Result<String, InstanceError> {
    let invalid = || InstanceError::InvalidMac(mac.to_string());
    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() != 6 {
        return Err(invalid());
    }
    let mut bytes = [0u8; 6];
    for (slot, octet) in bytes.iter_mut().zip(&octets) {
        if octet.len() != 2 {
            return Err(invalid());
        }
        *slot = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
    }
    if bytes[0] & 0x01 != 0 {
        return Err(invalid());
    }
    Ok(format_mac(&bytes))
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Draw a MAC under [`MAC_PREFIX`] that is not in `taken`.
///
/// The generated address is inserted into `taken`, so repeated calls with the
/// same set never return a duplicate.
pub fn allocate_mac(rng: &mut impl Rng, taken: &mut HashSet<String>) -> String {
    loop {
        let tail: [u8; 3] = rng.r#gen();
        let mac = format_mac(&[
            MAC_PREFIX[0],
            MAC_PREFIX[1],
            MAC_PREFIX[2],
            tail[0],
            tail[1],
            tail[2],
        ]);
        if taken.insert(mac.clone()) {
            return mac;
        }
    }
}

/// Normalize declared MACs and fill the missing ones.
///
/// `taken` maps every MAC already owned by another instance to its owner.
///
/// # Errors
///
/// Returns `InvalidMac` for malformed addresses and `MacInUse` when a declared
/// MAC belongs to another instance or repeats within the record.
pub fn assign_macs(
    nics: &mut [NicSpec],
    taken: &std::collections::HashMap<String, String>,
    self_id: &str,
    rng: &mut impl Rng,
) -> Result<(), InstanceError> {
    let mut used: HashSet<String> = taken.keys().cloned().collect();
    for nic in nics.iter_mut() {
        if let Some(mac) = nic.mac.as_deref() {
            let mac = normalize_mac(mac)?;
            if let Some(owner) = taken.get(&mac) {
                return Err(InstanceError::MacInUse {
                    mac,
                    owner: owner.clone(),
                });
            }
            if !used.insert(mac.clone()) {
                return Err(InstanceError::MacInUse {
                    mac,
                    owner: self_id.to_string(),
                });
            }
            nic.mac = Some(mac);
        }
    }
    for nic in nics.iter_mut().filter(|n| n.mac.is_none()) {
        nic.mac = Some(allocate_mac(rng, &mut used));
    }
    Ok(())
}

/// Bridge a NIC attaches to. A VLAN tag selects the per-VLAN bridge.
#[must_use]
pub fn effective_bridge(nic: &NicSpec) -> String {
    match nic.vlan {
        Some(tag) => format!("{}v{tag}", nic.bridge),
        None => nic.bridge.clone(),
    }
}

/// Disk handle for an instance on the given pool.
///
/// Local pools yield `<path>/<id>.qcow2`. RBD pools yield a QEMU `rbd:` URI
/// carrying the client identity and every monitor. QEMU splits the URI on
/// `:`, so the ports inside monitor addresses are escaped as `\:` and the
/// monitors are joined with `\;`.
#[must_use]
pub fn disk_handle(backend: &PoolBackend, id: &str) -> String {
    match backend {
        PoolBackend::Local { path } => local_disk_path(path, id),
        PoolBackend::Rbd {
            pool,
            monitors,
            user,
            key,
        } => {
            let mon_host = monitors
                .iter()
                .map(|m| m.replace(':', "\\:"))
                .collect::<Vec<_>>()
                .join("\\;");
            format!("rbd:{pool}/{id}:id={user}:key={key}:mon_host={mon_host}")
        }
    }
}

fn local_disk_path(pool_path: &Path, id: &str) -> String {
    pool_path.join(format!("{id}.qcow2")).display().to_string()
}

/// Whether a disk handle names an RBD image.
#[must_use]
pub fn is_rbd_handle(handle: &str) -> bool {
    handle.starts_with("rbd:")
}

/// Image format QEMU should assume for a disk handle.
#[must_use]
pub fn disk_format(handle: &str) -> &'static str {
    if is_rbd_handle(handle) { "raw" } else { "qcow2" }
}

/// Fields `update` must never let a caller rewrite.
const DERIVED_FIELDS: &[&str] = &[
    "id",
    "status",
    "created_at",
    "started_at",
    "stopped_at",
    "process",
    "display",
    "tpm",
    "seed_image",
    "warnings",
];

/// Deep-merge a partial JSON declaration into a record.
///
/// Objects merge key by key, every other value replaces. Derived runtime
/// fields are carried over from `current`, and `storage.disk` stays bound to
/// the provisioned image.
///
/// # Errors
///
/// Returns `InvalidDeclaration` if the patch is not an object, tries to change the
/// ID, or yields a record that no longer deserializes.
pub fn merge_update(
    current: &InstanceRecord,
    patch: &serde_json::Value,
) -> Result<InstanceRecord, InstanceError> {
    let serde_json::Value::Object(fields) = patch else {
        return Err(InstanceError::InvalidDeclaration(
            "expected a JSON object".to_string(),
        ));
    };
    if fields
        .get("id")
        .is_some_and(|id| id.as_str() != Some(current.id.as_str()))
    {
        return Err(InstanceError::InvalidDeclaration(
            "the instance ID is immutable".to_string(),
        ));
    }

    let mut merged = serde_json::to_value(current)
        .map_err(|e| InstanceError::InvalidDeclaration(e.to_string()))?;
    for (key, value) in fields {
        if DERIVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        merge_value(&mut merged[key.as_str()], value);
    }

    let mut next: InstanceRecord =
        serde_json::from_value(merged).map_err(|e| InstanceError::InvalidDeclaration(e.to_string()))?;
    next.storage.disk.clone_from(&current.storage.disk);
    next.storage.backend = current.storage.backend;
    next.storage.pool.clone_from(&current.storage.pool);
    Ok(next)
}

fn merge_value(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_value(
                    target.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
