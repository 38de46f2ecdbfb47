//! Property-based tests for MAC allocation and display port derivation.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};

use idve_cli::domain::display::{DISPLAY_SLOTS, display_number, display_port, projection};
use idve_cli::domain::instance::{allocate_mac, assign_macs, normalize_mac};
use idve_common::NicSpec;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn nic(mac: Option<&str>) -> NicSpec {
    NicSpec {
        bridge: "br0".to_string(),
        vlan: None,
        model: "virtio-net-pci".to_string(),
        mac: mac.map(String::from),
    }
}

#[test]
fn ten_thousand_allocations_are_unique() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut taken = HashSet::new();
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let mac = allocate_mac(&mut rng, &mut taken);
        assert!(mac.starts_with("52:54:00:"), "{mac}");
        assert!(seen.insert(mac));
    }
    assert_eq!(taken.len(), 10_000);
}

#[test]
fn assigned_macs_avoid_other_owners() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut taken = HashMap::new();
    for i in 0..500 {
        let owner = format!("vm{i}");
        let mut nics = vec![nic(None), nic(None)];
        assign_macs(&mut nics, &taken, &owner, &mut rng).unwrap();
        for n in &nics {
            let mac = n.mac.clone().unwrap();
            assert!(taken.insert(mac, owner.clone()).is_none());
        }
    }
    assert_eq!(taken.len(), 1000);
}

proptest! {
    /// Ports stay inside the configured window for any ID.
    #[test]
    fn prop_display_port_in_window(id in "[A-Za-z0-9][A-Za-z0-9_-]{0,63}") {
        let p = projection(&id);
        prop_assert!(p < DISPLAY_SLOTS);
        prop_assert_eq!(display_port(5900, &id), 5900 + p);
        prop_assert_eq!(display_number(5900, &id), p);
    }

    /// Derivation is stable across calls.
    #[test]
    fn prop_display_port_deterministic(id in "[a-z][a-z0-9-]{0,20}") {
        prop_assert_eq!(display_port(5900, &id), display_port(5900, &id));
    }

    /// A shifted base shifts the port and the display number equally.
    #[test]
    fn prop_display_base_offsets_display(id in "[a-z]{1,8}[0-9]{1,3}", shift in 0u16..100) {
        let base = 5900 + shift;
        prop_assert_eq!(display_port(base, &id) - 5900, display_number(base, &id));
    }

    /// Normalized MACs are lowercase, colon separated, and idempotent.
    #[test]
    fn prop_normalize_mac_idempotent(bytes in proptest::array::uniform6(any::<u8>())) {
        let unicast = bytes[0] & 0xfe;
        let raw = format!(
            "{:02X}-{:02X}-{:02X}-{:02X}-{:02X}-{:02X}",
            unicast, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        );
        let once = normalize_mac(&raw).unwrap();
        prop_assert_eq!(once.len(), 17);
        prop_assert_eq!(once.to_lowercase(), once.clone());
        prop_assert_eq!(normalize_mac(&once).unwrap(), once);
    }
}
