//! Orchestrator behaviour over the in-memory host.

#![allow(clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};

use idve_cli::application::SilentReporter;
use idve_cli::domain::error::{ErrorKind, classify};
use idve_cli::domain::InstanceError;
use idve_common::InstanceStatus;
use serde_json::json;

use crate::helpers::{demo_request, harness, harness_with};

const DISK: &str = "/var/lib/idve/instances/demo1.qcow2";
const SEED_DIR: &str = "/var/lib/idve/cloudinit/demo1";

fn instance_error(err: &anyhow::Error) -> &InstanceError {
    err.chain()
        .find_map(|c| c.downcast_ref::<InstanceError>())
        .unwrap_or_else(|| panic!("not an instance error: {err:#}"))
}

// ── create ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_provisions_disk_seed_and_record() {
    let h = harness();
    let outcome = h
        .orchestrator
        .create(demo_request("demo1"), &SilentReporter)
        .await
        .unwrap();

    let record = &outcome.record;
    assert!(outcome.start.is_none());
    assert_eq!(record.status, InstanceStatus::Created);
    assert_eq!(record.storage.disk.as_deref(), Some(DISK));
    assert_eq!(record.hardware.memory_mib, 2048);
    assert_eq!(record.hardware.cpu_sockets * record.hardware.cpu_cores, 2);
    let mac = record.network.nics[0].mac.as_deref().unwrap();
    assert!(mac.starts_with("52:54:00:"), "{mac}");

    let host = h.host();
    assert_eq!(
        host.calls_to("qemu-img"),
        vec![format!("qemu-img create -f qcow2 {DISK} 20G")]
    );
    assert!(host.has_file(DISK));
    assert!(host.has_file(format!("{SEED_DIR}/seed.iso")));
    assert!(host.file(format!("{SEED_DIR}/user-data")).unwrap().starts_with("#cloud-config"));
    assert!(host.file(format!("{SEED_DIR}/meta-data")).unwrap().contains("instance-id: demo1"));
    assert!(host.calls_to("qemu-system-x86_64").is_empty());

    assert_eq!(h.orchestrator.get("demo1").await.unwrap(), outcome.record);
}

#[tokio::test]
async fn create_rejects_duplicates_and_bad_ids() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let err = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::AlreadyExists(_)));

    let err = h.orchestrator.create(demo_request("../etc"), &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::InvalidId(_)));
    assert_eq!(classify(&err), ErrorKind::Invalid);
}

#[tokio::test]
async fn create_rejects_unknown_pool_template_and_bridge() {
    let h = harness();

    let mut request = demo_request("demo1");
    request.storage.pool = "ceph".to_string();
    let err = h.orchestrator.create(request, &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::PoolNotFound(_)));

    let mut request = demo_request("demo1");
    request.boot.template = Some("plan9".to_string());
    let err = h.orchestrator.create(request, &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::TemplateNotFound(_)));

    let mut request = demo_request("demo1");
    request.network.nics[0].bridge = "br9".to_string();
    let err = h.orchestrator.create(request, &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::UnknownBridge(b) if b == "br9"));

    assert!(h.host().calls_to("qemu-img").is_empty());
}

#[tokio::test]
async fn provisioning_failure_leaves_nothing_behind() {
    let h = harness();
    h.host().fail("qemu-img");

    let err = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::ProvisioningFailure);

    let err = h.orchestrator.get("demo1").await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::NotFound(_)));
    assert!(h.host().calls_to("qemu-system-x86_64").is_empty());
}

#[tokio::test]
async fn seed_failure_removes_the_new_disk() {
    let h = harness();
    h.host().fail("genisoimage");
    h.host().fail("mkisofs");

    let err = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::ProvisioningFailure);
    assert!(!h.host().has_file(DISK));
    assert!(!h.host().has_file(format!("{SEED_DIR}/user-data")));
    assert!(h.orchestrator.get("demo1").await.is_err());
}

#[tokio::test]
async fn seed_packaging_falls_back_to_mkisofs() {
    let h = harness();
    h.host().fail("genisoimage");

    let outcome = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    assert_eq!(h.host().calls_to("genisoimage").len(), 1);
    let mkisofs = h.host().calls_to("mkisofs");
    assert_eq!(mkisofs.len(), 1);
    assert!(mkisofs[0].contains("-volid cidata"), "{}", mkisofs[0]);
    let image = format!("{SEED_DIR}/seed.iso");
    assert!(h.host().has_file(&image));
    assert_eq!(
        outcome.record.seed_image.as_deref(),
        Some(std::path::Path::new(&image))
    );
}

#[tokio::test]
async fn create_with_start_launches() {
    let h = harness();
    let mut request = demo_request("demo1");
    request.start = true;
    let outcome = h.orchestrator.create(request, &SilentReporter).await.unwrap();
    let started = outcome.start.unwrap();
    assert_eq!(started.record.status, InstanceStatus::Running);
    assert_eq!(h.host().live_pids("demo1").len(), 1);
}

// ── MAC allocation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn macs_are_unique_across_instances() {
    let h = harness();
    let a = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    let b = h.orchestrator.create(demo_request("demo2"), &SilentReporter).await.unwrap();
    let mac_a = a.record.network.nics[0].mac.clone().unwrap();
    assert_ne!(Some(mac_a.as_str()), b.record.network.nics[0].mac.as_deref());

    let mut request = demo_request("demo3");
    request.network.nics[0].mac = Some(mac_a.to_uppercase());
    let err = h.orchestrator.create(request, &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::MacInUse { owner, .. } if owner == "demo1"));
    assert_eq!(classify(&err), ErrorKind::Conflict);
}

// ── start / stop / status / delete ───────────────────────────────────────────

#[tokio::test]
async fn demo_lifecycle_end_to_end() {
    let h = harness();
    let orch = &h.orchestrator;
    orch.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let started = orch.start("demo1", &SilentReporter).await.unwrap();
    let record = &started.record;
    assert_eq!(record.status, InstanceStatus::Running);
    assert!(started.warnings.is_empty(), "{:?}", started.warnings);
    let display = record.display.unwrap();
    assert_eq!(display.display, 5901);
    assert_eq!(display.proxy, Some(7901));

    let launches = h.host().calls_to("qemu-system-x86_64");
    assert_eq!(launches.len(), 1);
    let cmd = &launches[0];
    assert!(cmd.contains("-name demo1"), "{cmd}");
    assert!(cmd.contains("-m 2048"), "{cmd}");
    assert!(cmd.contains("-vnc :1"), "{cmd}");
    assert!(cmd.contains(DISK), "{cmd}");
    assert!(cmd.contains("seed.iso"), "{cmd}");
    assert_eq!(h.host().calls_to("websockify"), vec!["websockify --daemon 7901 localhost:5901"]);

    let status = orch.status("demo1").await.unwrap();
    assert_eq!(status.status, InstanceStatus::Running);
    assert_eq!(status.pid, Some(record.process.unwrap().pid));
    assert_eq!(status.display_port, Some(5901));

    let stopped = orch.stop("demo1", &SilentReporter).await.unwrap();
    assert_eq!(stopped.status, InstanceStatus::Stopped);
    assert!(stopped.process.is_none());
    assert!(h.host().live_pids("demo1").is_empty());
    assert_eq!(orch.status("demo1").await.unwrap().status, InstanceStatus::Stopped);

    orch.delete("demo1", &SilentReporter).await.unwrap();
    let err = orch.get("demo1").await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::NotFound);
    assert!(!h.host().has_file(DISK));
    assert!(!h.host().has_file(format!("{SEED_DIR}/seed.iso")));
}

#[tokio::test]
async fn second_start_is_rejected() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();

    let err = h.orchestrator.start("demo1", &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::AlreadyRunning(_)));
    assert_eq!(h.host().calls_to("qemu-system-x86_64").len(), 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let first = h.orchestrator.stop("demo1", &SilentReporter).await.unwrap();
    assert_eq!(first.status, InstanceStatus::Created);

    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    h.orchestrator.stop("demo1", &SilentReporter).await.unwrap();
    let kills = h.host().calls_to("kill").len();
    let again = h.orchestrator.stop("demo1", &SilentReporter).await.unwrap();
    assert_eq!(again.status, InstanceStatus::Stopped);
    assert_eq!(h.host().calls_to("kill").len(), kills);
}

#[tokio::test]
async fn status_observes_crash_without_rewriting_record() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    h.host().crash("demo1");

    let status = h.orchestrator.status("demo1").await.unwrap();
    assert_eq!(status.status, InstanceStatus::Stopped);
    assert_eq!(status.recorded, InstanceStatus::Running);
    assert!(status.pid.is_none());
    assert!(status.address.is_none());
    let stored = h.orchestrator.get("demo1").await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Running);

    // A crashed instance can be started again.
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
}

#[tokio::test]
async fn launch_failure_marks_record_error() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.host().fail("qemu-system-x86_64");

    let err = h.orchestrator.start("demo1", &SilentReporter).await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::LaunchFailure);
    let stored = h.orchestrator.get("demo1").await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Error);
    assert!(stored.process.is_none());
    assert!(h.host().calls_to("websockify").is_empty());
}

#[tokio::test]
async fn display_port_collision_is_a_conflict() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.orchestrator.create(demo_request("demo1001"), &SilentReporter).await.unwrap();
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();

    let err = h.orchestrator.start("demo1001", &SilentReporter).await.unwrap_err();
    assert!(matches!(
        instance_error(&err),
        InstanceError::DisplayPortInUse { port: 5901, owner } if owner == "demo1"
    ));
}

#[tokio::test]
async fn tpm_failure_degrades_to_warning() {
    let h = harness();
    let mut request = demo_request("demo1");
    request.hardware.tpm = true;
    h.orchestrator.create(request, &SilentReporter).await.unwrap();
    h.host().fail("swtpm");

    let started = h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    assert_eq!(started.record.status, InstanceStatus::Running);
    assert!(started.warnings.iter().any(|w| w.contains("TPM")), "{:?}", started.warnings);
    let cmd = &h.host().calls_to("qemu-system-x86_64")[0];
    assert!(!cmd.contains("tpm"), "{cmd}");
}

#[tokio::test]
async fn tpm_socket_is_attached_when_emulator_starts() {
    let h = harness();
    let mut request = demo_request("demo1");
    request.hardware.tpm = true;
    h.orchestrator.create(request, &SilentReporter).await.unwrap();

    let started = h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    assert!(started.warnings.is_empty(), "{:?}", started.warnings);
    assert_eq!(h.host().calls_to("swtpm").len(), 1);
    let cmd = &h.host().calls_to("qemu-system-x86_64")[0];
    assert!(cmd.contains("tpm"), "{cmd}");
}

#[tokio::test]
async fn exhausted_proxy_ports_still_start() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.host().busy_ports.borrow_mut().extend(7901..=7910);

    let started = h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    assert_eq!(started.record.status, InstanceStatus::Running);
    assert_eq!(started.record.display.unwrap().proxy, None);
    assert!(started.warnings.iter().any(|w| w.contains("display proxy")));

    let console = h.orchestrator.console("demo1").await.unwrap();
    assert!(console.running);
    assert!(console.url.is_none());
}

#[tokio::test]
async fn delete_refuses_when_process_survives() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    h.host().unkillable.set(true);

    let err = h.orchestrator.delete("demo1", &SilentReporter).await.unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::StillRunning(_)));
    assert!(h.host().has_file(DISK));
    assert!(h.orchestrator.get("demo1").await.is_ok());
}

#[tokio::test]
async fn delete_stops_a_running_instance_first() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();

    h.orchestrator.delete("demo1", &SilentReporter).await.unwrap();
    assert!(h.host().live_pids("demo1").is_empty());
    assert!(h.orchestrator.get("demo1").await.is_err());
}

// ── update and seed ──────────────────────────────────────────────────────────

#[tokio::test]
async fn update_rebuilds_seed_only_when_inputs_change() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    let builds = || h.host().calls_to("genisoimage").len();
    assert_eq!(builds(), 1);

    let renamed = h
        .orchestrator
        .update("demo1", &json!({ "name": "web" }), &SilentReporter)
        .await
        .unwrap();
    assert_eq!(renamed.name, "web");
    assert_eq!(builds(), 1);

    h.orchestrator
        .update("demo1", &json!({ "boot": { "hostname": "web01" } }), &SilentReporter)
        .await
        .unwrap();
    assert_eq!(builds(), 2);
    let meta = h.host().file(format!("{SEED_DIR}/meta-data")).unwrap();
    assert!(meta.contains("local-hostname: web01"), "{meta}");
}

#[tokio::test]
async fn seed_rebuild_is_deterministic() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    let user_data = h.host().file(format!("{SEED_DIR}/user-data")).unwrap();

    h.host().files.borrow_mut().remove(std::path::Path::new(&format!("{SEED_DIR}/seed.iso")));
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();

    assert_eq!(h.host().calls_to("genisoimage").len(), 2);
    assert_eq!(h.host().file(format!("{SEED_DIR}/user-data")).unwrap(), user_data);
}

#[tokio::test]
async fn update_rejects_size_changes_and_id_changes() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let err = h
        .orchestrator
        .update("demo1", &json!({ "storage": { "size_gib": 40 } }), &SilentReporter)
        .await
        .unwrap_err();
    assert!(matches!(instance_error(&err), InstanceError::InvalidDeclaration(_)));

    let err = h
        .orchestrator
        .update("demo1", &json!({ "id": "demo2" }), &SilentReporter)
        .await
        .unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Invalid);
}

// ── resize ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resize_grows_offline_and_online() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let err = h.orchestrator.resize("demo1", 10, &SilentReporter).await.unwrap_err();
    assert!(matches!(
        instance_error(&err),
        InstanceError::ShrinkRejected { current: 20, requested: 10 }
    ));

    let record = h.orchestrator.resize("demo1", 30, &SilentReporter).await.unwrap();
    assert_eq!(record.storage.size_gib, 30);
    assert!(h.host().calls_to("qemu-img").contains(&format!("qemu-img resize {DISK} 30G")));

    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    h.orchestrator.resize("demo1", 40, &SilentReporter).await.unwrap();
    assert!(h.host().calls_to("qmp").iter().any(|c| c.starts_with("qmp block_resize")));
    assert_eq!(h.orchestrator.get("demo1").await.unwrap().storage.size_gib, 40);
}

// ── read-only queries ────────────────────────────────────────────────────────

#[tokio::test]
async fn address_comes_from_neighbor_table() {
    let h = harness_with(|cfg| cfg.network.lease_files.clear());
    let created = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    let mac = created.record.network.nics[0].mac.clone().unwrap();
    *h.host().neighbors.borrow_mut() = format!(
        "192.168.122.7 dev br0 lladdr 52:54:00:00:00:01 STALE\n192.168.122.50 dev br0 lladdr {mac} REACHABLE\n"
    );

    assert_eq!(h.orchestrator.address("demo1").await.unwrap(), None);

    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    assert_eq!(
        h.orchestrator.address("demo1").await.unwrap(),
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 122, 50)))
    );
}

#[tokio::test]
async fn address_falls_back_to_lease_files() {
    let h = harness_with(|cfg| {
        cfg.network.lease_files = vec!["/var/lib/misc/dnsmasq.leases".into()];
    });
    let created = h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();
    let mac = created.record.network.nics[0].mac.clone().unwrap();
    h.host().put_file(
        "/var/lib/misc/dnsmasq.leases",
        &format!("1700000000 {mac} 192.168.122.61 demo1 *\n"),
    );
    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();

    assert_eq!(
        h.orchestrator.address("demo1").await.unwrap(),
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 122, 61)))
    );
}

#[tokio::test]
async fn launch_command_is_a_dry_run() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let args = h.orchestrator.launch_command("demo1").await.unwrap();
    let joined = args.join(" ");
    assert!(joined.contains("-name demo1"), "{joined}");
    assert!(joined.contains("-daemonize"), "{joined}");
    assert!(h.host().calls_to("qemu-system-x86_64").is_empty());
}

#[tokio::test]
async fn console_of_stopped_instance_has_no_url() {
    let h = harness();
    h.orchestrator.create(demo_request("demo1"), &SilentReporter).await.unwrap();

    let console = h.orchestrator.console("demo1").await.unwrap();
    assert!(!console.running);
    assert_eq!(console.display_port, 5901);
    assert_eq!(console.vnc_display, 1);
    assert!(console.url.is_none());

    h.orchestrator.start("demo1", &SilentReporter).await.unwrap();
    let console = h.orchestrator.console("demo1").await.unwrap();
    assert_eq!(console.proxy_port, Some(7901));
    assert!(console.url.unwrap().contains(":7901/"));
}

#[tokio::test]
async fn status_all_is_sorted() {
    let h = harness();
    for id in ["demo3", "demo1", "demo2"] {
        h.orchestrator.create(demo_request(id), &SilentReporter).await.unwrap();
    }
    h.orchestrator.start("demo2", &SilentReporter).await.unwrap();

    let reports = h.orchestrator.status_all().await.unwrap();
    let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["demo1", "demo2", "demo3"]);
    assert_eq!(reports[1].status, InstanceStatus::Running);
    assert_eq!(reports[0].status, InstanceStatus::Stopped);
}

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let h = harness();
    for err in [
        h.orchestrator.start("ghost", &SilentReporter).await.unwrap_err(),
        h.orchestrator.stop("ghost", &SilentReporter).await.unwrap_err(),
        h.orchestrator.status("ghost").await.unwrap_err(),
        h.orchestrator.delete("ghost", &SilentReporter).await.unwrap_err(),
    ] {
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }
}
