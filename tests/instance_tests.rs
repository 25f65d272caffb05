mod common;

use std::time::Duration;

use common::{disk, vm, FakeCloud, VM_ID};
use migrate_reconciler::types::{InstanceStatus, PortRef};
use migrate_reconciler::{InstanceProvisioner, ReconcileError, ReconcileOptions, VolumeResolver};
use tokio_util::sync::CancellationToken;

fn provisioner(cloud: &std::sync::Arc<FakeCloud>) -> InstanceProvisioner {
    let options = ReconcileOptions::default();
    InstanceProvisioner::new(
        cloud.clone(),
        VolumeResolver::new(cloud.clone(), options.unsafe_volume_by_name),
        &options,
    )
}

fn cloud_with_volumes() -> std::sync::Arc<FakeCloud> {
    let cloud = FakeCloud::new();
    cloud.add_current_volume("vol-boot", &disk(2000));
    cloud.add_legacy_volume("vol-data", &disk(2001));
    cloud
}

fn ports() -> Vec<PortRef> {
    vec![
        PortRef {
            port_id: "port-1".to_string(),
        },
        PortRef {
            port_id: "port-2".to_string(),
        },
    ]
}

#[tokio::test(start_paused = true)]
async fn test_boot_index_follows_disk_order() {
    let cloud = cloud_with_volumes();

    let instance = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Active);
    assert_eq!(instance.name, "web-01");

    let requests = cloud.server_requests();
    assert_eq!(requests.len(), 1);
    let devices: Vec<(u32, &str)> = requests[0]
        .block_device_mapping_v2
        .iter()
        .map(|d| (d.boot_index, d.volume_id.as_str()))
        .collect();
    assert_eq!(devices, vec![(0, "vol-boot"), (1, "vol-data")]);
    assert_eq!(requests[0].networks, ports());
    assert_eq!(requests[0].flavor_ref, "m1.large");
}

#[tokio::test(start_paused = true)]
async fn test_waits_through_build() {
    let cloud = cloud_with_volumes();
    cloud.script_statuses(&["BUILD", "BUILD"], "ACTIVE");

    let instance = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(instance.id, "server-1");
    assert_eq!(cloud.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_times_out_and_reports_created_instance() {
    let cloud = cloud_with_volumes();
    cloud.script_statuses(&[], "BUILD");

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        ReconcileError::Timeout { waited, .. } => {
            assert!(*waited >= Duration::from_secs(300));
            assert!(*waited < Duration::from_secs(302));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert_eq!(err.created_instance(), Some("server-1"));
    assert_eq!(cloud.server_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_status_fails_with_fault() {
    let cloud = cloud_with_volumes();
    cloud.script_statuses(&["BUILD"], "ERROR");
    cloud.set_fault("No valid host was found");

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        ReconcileError::InstanceFailed { status, .. } => {
            assert_eq!(status, "ERROR (No valid host was found)");
        }
        other => panic!("expected InstanceFailed, got {:?}", other),
    }
    assert_eq!(err.created_instance(), Some("server-1"));
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_keeps_instance_id() {
    let cloud = cloud_with_volumes();
    cloud.fail_polls();

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::WaitFailed { .. }));
    assert_eq!(err.created_instance(), Some("server-1"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting() {
    let cloud = cloud_with_volumes();
    cloud.script_statuses(&[], "BUILD");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled { .. }));
    assert_eq!(err.created_instance(), Some("server-1"));
    assert!(err.to_string().contains("server-1"));
}

#[tokio::test]
async fn test_cancelled_before_submit_creates_nothing() {
    let cloud = cloud_with_volumes();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled { instance_id: None }));
    assert!(cloud.server_requests().is_empty());
}

#[tokio::test]
async fn test_missing_volume_creates_nothing() {
    let cloud = FakeCloud::new();
    cloud.add_current_volume("vol-boot", &disk(2000));

    let err = provisioner(&cloud)
        .provision(&vm(), "m1.large", &ports(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::NotFound { .. }));
    assert_eq!(err.created_instance(), None);
    assert!(cloud.server_requests().is_empty());
}

#[tokio::test]
async fn test_plan_resolves_without_submitting() {
    let cloud = cloud_with_volumes();

    let plan = provisioner(&cloud)
        .plan(&vm(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(plan.name, "web-01");
    assert_eq!(plan.block_devices.len(), 2);
    assert!(cloud.server_requests().is_empty());
    assert!(cloud
        .volume_queries()
        .iter()
        .all(|q| q.name.starts_with(VM_ID)));
}
