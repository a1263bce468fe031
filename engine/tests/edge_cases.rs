//! Edge case tests for ledgersync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use chrono::{DateTime, TimeZone, Utc};
use ledgersync_engine::{
    conflict, ChangeAction, Company, ConflictType, EntityKind, EntityPayload, EntityRecord, Error,
    Item, PendingChange, Priority, QueuePolicy, ResolutionOutcome, ResolutionStrategy, Resolver,
    SessionHistory, SyncSession, Voucher, PHASE_ORDER,
};
use std::sync::Arc;
use std::time::Duration;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn company_record(id: &str, name: &str, updated: i64, synced: Option<i64>) -> EntityRecord {
    let mut rec = EntityRecord::new(
        id.to_string(),
        EntityPayload::Company(Company {
            name: name.into(),
            gstin: None,
            state: None,
        }),
        ts(updated),
    );
    rec.last_synced_at = synced.map(ts);
    rec
}

// ============================================================================
// Timestamp Edge Cases
// ============================================================================

#[test]
fn record_synced_exactly_at_updated_at_is_clean() {
    let rec = company_record("co-1", "Acme", 100, Some(100));
    assert!(!rec.is_dirty());
}

#[test]
fn record_synced_one_second_before_update_is_dirty() {
    let rec = company_record("co-1", "Acme", 101, Some(100));
    assert!(rec.is_dirty());
}

#[test]
fn equal_edit_timestamps_on_both_sides_are_not_a_conflict() {
    // Both sides landed on the same instant; there is nothing to arbitrate
    // and applying the remote copy loses no information.
    let local = company_record("co-1", "Acme", 200, Some(100));
    let remote = company_record("co-1", "Acme Ltd", 200, None);
    assert!(conflict::detect("cf", &local, &remote, ts(300)).is_none());
}

#[test]
fn epoch_zero_timestamps() {
    let local = company_record("co-1", "Acme", 0, Some(0));
    let remote = company_record("co-1", "Acme", 0, None);
    assert!(conflict::detect("cf", &local, &remote, ts(0)).is_none());
    assert!(!local.is_dirty());
}

#[test]
fn far_future_remote_edit_still_classifies_by_watermark() {
    let local = company_record("co-1", "Acme", 200, Some(100));
    let remote = company_record("co-1", "Acme", 4_102_444_800, None); // year 2100
    let cf = conflict::detect("cf", &local, &remote, ts(300)).unwrap();
    assert_eq!(cf.conflict_type, ConflictType::DataMismatch);
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[test]
fn empty_string_fields_survive_serde() {
    let rec = EntityRecord::new(
        "i-1".to_string(),
        EntityPayload::Item(Item {
            name: "".into(),
            unit: "".into(),
            rate: 0.0,
            quantity: 0.0,
        }),
        ts(100),
    );
    let json = serde_json::to_string(&rec).unwrap();
    let back: EntityRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn unicode_company_names() {
    let names = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
    ];
    for name in names {
        let rec = company_record("co-1", name, 100, None);
        let json = serde_json::to_string(&rec).unwrap();
        let back: EntityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload, rec.payload, "failed for {name:?}");
    }
}

#[test]
fn negative_voucher_amounts() {
    // Credit notes come through as negative amounts.
    let rec = EntityRecord::new(
        "v-1".to_string(),
        EntityPayload::Voucher(Voucher {
            voucher_no: "CN-001".into(),
            voucher_type: "credit_note".into(),
            date: ts(100),
            amount: -500.25,
            company_id: "co-1".into(),
        }),
        ts(100),
    );
    let json = serde_json::to_string(&rec).unwrap();
    let back: EntityRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn party_payload_accepts_arbitrary_shape() {
    let payload = EntityPayload::Party(serde_json::json!({
        "name": "Supplier & Co",
        "ledger": {"group": "Sundry Creditors", "balance": -1200.5},
        "tags": ["wholesale", "north"],
    }));
    assert_eq!(payload.kind(), EntityKind::Party);
    let rec = EntityRecord::new("p-1".to_string(), payload, ts(100));
    let json = serde_json::to_string(&rec).unwrap();
    let back: EntityRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn touch_with_wrong_payload_kind_is_rejected() {
    let mut rec = company_record("co-1", "Acme", 100, None);
    let err = rec
        .touch(
            EntityPayload::Item(Item {
                name: "Widget".into(),
                unit: "pcs".into(),
                rate: 1.0,
                quantity: 1.0,
            }),
            ts(200),
        )
        .unwrap_err();
    assert_eq!(
        err,
        Error::PayloadKindMismatch {
            expected: EntityKind::Company,
            got: EntityKind::Item,
        }
    );
    // And the record is untouched.
    assert_eq!(rec.updated_at, ts(100));
}

// ============================================================================
// Queue Edge Cases
// ============================================================================

#[test]
fn delete_change_has_no_record() {
    let change = PendingChange::delete("ch-1", EntityKind::Voucher, "v-1", Priority::High, ts(100));
    assert_eq!(change.action, ChangeAction::Delete);
    assert!(change.payload.is_none());
    assert!(change.to_record().is_none());
}

#[test]
fn zero_retries_backoff_is_zero() {
    let policy = QueuePolicy::default();
    assert_eq!(policy.backoff_delay(0), Duration::ZERO);
}

#[test]
fn queue_of_size_one_overflows_immediately_and_evicts_one() {
    let policy = QueuePolicy {
        max_size: 1,
        ..QueuePolicy::default()
    };
    assert!(policy.overflowed(1));
    assert!(!policy.overflowed(0));
    assert_eq!(policy.eviction_count(), 1);
}

#[test]
fn sort_of_empty_and_single_slices() {
    let mut empty: Vec<PendingChange> = vec![];
    QueuePolicy::sort_for_drain(&mut empty);
    assert!(empty.is_empty());

    let rec = company_record("co-1", "Acme", 100, None);
    let mut single = vec![PendingChange::create("ch-1", &rec, Priority::Low, ts(100))];
    QueuePolicy::sort_for_drain(&mut single);
    assert_eq!(single[0].id, "ch-1");
}

// ============================================================================
// Resolution Edge Cases
// ============================================================================

#[test]
fn merge_fn_changing_payload_kind_is_rejected() {
    // A merge function that returns the wrong payload kind must not
    // silently corrupt the record.
    let resolver = Resolver::new(ResolutionStrategy::Merge).with_merge_fn(Arc::new(|_, _| {
        EntityPayload::Item(Item {
            name: "wrong".into(),
            unit: "pcs".into(),
            rate: 1.0,
            quantity: 1.0,
        })
    }));
    let local = company_record("co-1", "Acme", 200, Some(100));
    let remote = company_record("co-1", "Acme Ltd", 300, None);
    let cf = conflict::detect("cf", &local, &remote, ts(400)).unwrap();

    let err = resolver.resolve(&cf, None, ts(500)).unwrap_err();
    assert_eq!(
        err,
        Error::PayloadKindMismatch {
            expected: EntityKind::Company,
            got: EntityKind::Item,
        }
    );
}

#[test]
fn remote_strategy_on_duplicate_keeps_remote_copy() {
    let local = company_record("co-1", "Acme", 200, None);
    let remote = company_record("co-1", "Acme", 150, None);
    let cf = conflict::detect("cf", &local, &remote, ts(400)).unwrap();
    assert_eq!(cf.conflict_type, ConflictType::Duplicate);

    let outcome = Resolver::default()
        .resolve(&cf, Some(ResolutionStrategy::Remote), ts(500))
        .unwrap();
    assert!(matches!(outcome, ResolutionOutcome::ApplyRemote(_)));
}

#[test]
fn resolving_twice_fails_the_second_time() {
    let local = company_record("co-1", "Acme", 200, Some(100));
    let remote = company_record("co-1", "Acme Ltd", 300, None);
    let mut cf = conflict::detect("cf", &local, &remote, ts(400)).unwrap();

    let resolver = Resolver::default();
    resolver
        .resolve(&cf, Some(ResolutionStrategy::Local), ts(500))
        .unwrap();
    cf.mark_resolved(ts(500));

    let err = resolver
        .resolve(&cf, Some(ResolutionStrategy::Remote), ts(600))
        .unwrap_err();
    assert!(matches!(err, Error::ConflictNotFound(_)));
}

// ============================================================================
// Session Edge Cases
// ============================================================================

#[test]
fn phase_order_covers_every_kind_once() {
    assert_eq!(PHASE_ORDER.len(), 4);
    assert_eq!(PHASE_ORDER[0], EntityKind::Company);
    assert_eq!(PHASE_ORDER[3], EntityKind::Party);
    for kind in [
        EntityKind::Company,
        EntityKind::Voucher,
        EntityKind::Item,
        EntityKind::Party,
    ] {
        assert_eq!(PHASE_ORDER.iter().filter(|k| **k == kind).count(), 1);
    }
}

#[test]
fn session_with_only_skipped_phases_still_completes() {
    let mut session = SyncSession::begin("s-1", false, ts(100));
    session.phase_mut(EntityKind::Party).skipped = 1;
    session.complete(ts(200));
    assert_eq!(session.total_pulled(), 0);
    assert_eq!(session.summary(), "party 0/0");
}

#[test]
fn history_capacity_of_one_keeps_only_the_latest() {
    let mut history = SessionHistory::new(1);
    for i in 0..5 {
        history.push(SyncSession::begin(format!("s-{i}"), false, ts(i)));
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history.latest().unwrap().id, "s-4");
}
