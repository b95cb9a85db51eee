use rand::Rng;
use std::sync::Arc;
use vm_fleet_manager::billing::{BillingLedger, BillingRates, BillingStatus, ResourceShape};
use vm_fleet_manager::core::{ImageRepository, OsImage, VmOrchestrator};
use vm_fleet_manager::errors::ErrorKind;

const EPSILON: f64 = 1e-9;

fn ledger() -> BillingLedger {
    BillingLedger::new(BillingRates::default())
}

fn shape(cpu_cores: u32, storage_gb: u32) -> Option<ResourceShape> {
    Some(ResourceShape { cpu_cores, storage_gb })
}

#[tokio::test]
async fn test_open_initializes_record() {
    let ledger = ledger();
    let record = ledger.open("user1").await.unwrap();

    assert_eq!(record.user_id, "user1");
    assert_eq!(record.current_charges, 0.0);
    assert_eq!(record.total_charges, 0.0);
    assert_eq!(record.status, BillingStatus::Current);
}

#[tokio::test]
async fn test_accrue_uses_compute_and_storage_rates() {
    let ledger = ledger();
    ledger.open("user1").await.unwrap();

    let cost = ledger.accrue("user1", shape(4, 200)).await.unwrap();
    assert!((cost - 10.4).abs() < EPSILON);

    let record = ledger.get_record("user1").await.unwrap();
    assert!((record.current_charges - 10.4).abs() < EPSILON);
    assert!((record.total_charges - 10.4).abs() < EPSILON);
}

#[tokio::test]
async fn test_accrue_from_vm_shape_ignores_ram() {
    let catalog = ImageRepository::seeded(vec![OsImage::new("TestOS", "1.0", "Linux")])
        .await
        .unwrap();
    let orchestrator = VmOrchestrator::new(Arc::new(catalog));
    let small_ram = orchestrator.create_vm("TestOS", 2, 4, 50).await.unwrap();
    let big_ram = orchestrator.create_vm("TestOS", 2, 64, 50).await.unwrap();

    let ledger = ledger();
    ledger.open("user2").await.unwrap();
    let a = ledger.accrue("user2", Some((&small_ram).into())).await.unwrap();
    let b = ledger.accrue("user2", Some((&big_ram).into())).await.unwrap();

    assert!((a - 2.7).abs() < EPSILON);
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_accrue_unknown_user() {
    let ledger = ledger();
    let err = ledger.accrue("ghost", shape(1, 1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_payment_clears_balance() {
    let ledger = ledger();
    ledger.open("user1").await.unwrap();
    ledger.accrue("user1", shape(4, 200)).await.unwrap();

    let record = ledger.apply_payment("user1", 10.4).await.unwrap();
    assert!(record.total_charges.abs() < EPSILON);
    assert_eq!(record.status, BillingStatus::Current);

    // Paying into an empty balance stays clamped at zero
    let record = ledger.apply_payment("user1", 5.0).await.unwrap();
    assert_eq!(record.total_charges, 0.0);
    assert_eq!(record.status, BillingStatus::Current);
}

#[tokio::test]
async fn test_partial_payment_keeps_remaining_balance() {
    let ledger = ledger();
    ledger.open("user3").await.unwrap();
    ledger.accrue("user3", shape(2, 50)).await.unwrap();
    ledger.accrue("user3", shape(2, 50)).await.unwrap();

    let record = ledger.apply_payment("user3", 2.0).await.unwrap();
    assert!((record.total_charges - 3.4).abs() < EPSILON);
    // Payments never touch the period's running spend
    assert!((record.current_charges - 5.4).abs() < EPSILON);
}

#[tokio::test]
async fn test_payment_unknown_user() {
    let err = ledger().apply_payment("ghost", 1.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_close_period_is_idempotent() {
    let ledger = ledger();
    let opened = ledger.open("user1").await.unwrap();
    ledger.accrue("user1", shape(4, 200)).await.unwrap();

    let first = ledger.close_period("user1").await.unwrap();
    let second = ledger.close_period("user1").await.unwrap();

    for record in [&first, &second] {
        assert_eq!(record.current_charges, 0.0);
        assert!((record.total_charges - 10.4).abs() < EPSILON);
    }
    assert!(first.billing_period >= opened.billing_period);
    assert!(second.billing_period >= first.billing_period);
}

#[tokio::test]
async fn test_close_period_unknown_user() {
    let err = ledger().close_period("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_custom_rates() {
    let ledger = BillingLedger::new(BillingRates::new(0.5, 0.0).unwrap());
    ledger.open("tenant").await.unwrap();
    let cost = ledger.accrue("tenant", shape(8, 1000)).await.unwrap();
    assert!((cost - 4.0).abs() < EPSILON);
}

#[tokio::test]
async fn test_random_accrue_and_pay_never_go_negative() {
    let ledger = ledger();
    ledger.open("user1").await.unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..1_000 {
        let record = if rng.gen_bool(0.5) {
            ledger
                .accrue("user1", shape(rng.gen_range(0..=32), rng.gen_range(0..=1000)))
                .await
                .unwrap();
            ledger.get_record("user1").await.unwrap()
        } else {
            ledger.apply_payment("user1", rng.gen_range(0.0..100.0)).await.unwrap()
        };
        assert!(record.total_charges >= 0.0);
    }
}

#[tokio::test]
async fn test_list_records_sorted_by_user() {
    let ledger = ledger();
    for user in ["carol", "alice", "bob"] {
        ledger.open(user).await.unwrap();
    }
    let users: Vec<_> = ledger.list_records().await.into_iter().map(|r| r.user_id).collect();
    assert_eq!(users, vec!["alice", "bob", "carol"]);
}
