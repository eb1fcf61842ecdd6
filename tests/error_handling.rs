//! Validation failures, corruption detection and error classification.

use carestore::{
    CarePlan, DateInterval, Entity, EntityKind, ErrorCategory, Outcome, OutcomeValue, Query,
    Schedule, ScheduleElement, Store, StoreConfig, StoreError, SubscriptionFilter, Task,
    ValueKind, VersionId,
};
use chrono::{Duration, Utc};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration as StdDuration;
use tempfile::TempDir;

fn memory_store() -> Store {
    Store::open(StoreConfig::in_memory("errors")).unwrap()
}

fn daily_task(id: &str) -> Task {
    let start = Utc::now() - Duration::days(5);
    Task::new(id, Some(id.to_uppercase()), Schedule::daily(start, None)).effective(start)
}

fn done() -> Vec<OutcomeValue> {
    vec![OutcomeValue::new(ValueKind::Boolean(true))]
}

// --- Outcome Validation ---

#[test]
fn test_duplicate_outcome_rejected() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);

    store
        .add(vec![Outcome::new(task.version_id(), 0, done())])
        .wait()
        .unwrap();

    let result = store
        .add(vec![Outcome::new(task.version_id(), 0, done())])
        .wait();
    match result {
        Err(StoreError::DuplicateOutcome {
            task_version_id,
            occurrence_index,
        }) => {
            assert_eq!(task_version_id, task.version_id());
            assert_eq!(occurrence_index, 0);
        }
        other => panic!("expected DuplicateOutcome, got {:?}", other),
    }

    // Another occurrence of the same task is fine.
    store
        .add(vec![Outcome::new(task.version_id(), 1, done())])
        .wait()
        .unwrap();
}

#[test]
fn test_duplicate_outcome_in_one_call() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);

    let mut second = Outcome::new(task.version_id(), 0, done());
    second.header.id = "other-id".into();
    let result = store
        .add(vec![Outcome::new(task.version_id(), 0, done()), second])
        .wait();
    assert!(matches!(result, Err(StoreError::DuplicateOutcome { .. })));
    assert_eq!(store.stats().wait().unwrap().version_count, 1);
}

#[test]
fn test_superseded_outcome_allowed_in_migration_mode() {
    let config = StoreConfig {
        migration_mode: true,
        ..StoreConfig::in_memory("migration")
    };
    let store = Store::open(config).unwrap();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);
    store
        .add(vec![Outcome::new(task.version_id(), 0, done())])
        .wait()
        .unwrap();

    let mut historical = Outcome::new(task.version_id(), 0, done());
    historical.header.id = "legacy".into();
    historical.header.next_version_id = Some(VersionId::new());

    let added = store.add(vec![historical.clone()]).wait().unwrap().remove(0);
    assert_eq!(added.header.next_version_id, historical.header.next_version_id);

    // A live duplicate is still rejected.
    let mut live = Outcome::new(task.version_id(), 0, done());
    live.header.id = "live".into();
    assert!(matches!(
        store.add(vec![live]).wait(),
        Err(StoreError::DuplicateOutcome { .. })
    ));
}

#[test]
fn test_deleted_outcome_frees_slot() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);
    let outcome = store
        .add(vec![Outcome::new(task.version_id(), 2, done())])
        .wait()
        .unwrap()
        .remove(0);
    store.delete(vec![outcome]).wait().unwrap();

    let again = store
        .add(vec![Outcome::new(task.version_id(), 2, done())])
        .wait()
        .unwrap();
    assert_eq!(again.len(), 1);
}

#[test]
fn test_outcome_past_schedule_end() {
    let store = memory_store();
    let start = Utc::now() - Duration::days(1);
    let task = Task::new("pill", None, Schedule::once(start)).effective(start);
    let task = store.add(vec![task]).wait().unwrap().remove(0);

    let result = store
        .add(vec![Outcome::new(task.version_id(), 1, done())])
        .wait();
    assert!(matches!(
        result,
        Err(StoreError::InvalidOccurrence {
            occurrence_index: 1,
            ..
        })
    ));
}

#[test]
fn test_outcome_for_missing_task() {
    let store = memory_store();
    let result = store
        .add(vec![Outcome::new(VersionId::new(), 0, done())])
        .wait();
    assert!(matches!(
        result,
        Err(StoreError::DanglingRelationship {
            kind: EntityKind::Outcome,
            target_kind: EntityKind::Task,
            ..
        })
    ));
}

#[test]
fn test_far_occurrence_answers_promptly() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);

    // Beyond any representable date.
    let result = store
        .add(vec![Outcome::new(task.version_id(), 50_000_000_000, done())])
        .wait_timeout(StdDuration::from_secs(5))
        .expect("validation should not stall the store");
    assert!(matches!(result, Err(StoreError::InvalidOccurrence { .. })));

    // Far but real.
    let added = store
        .add(vec![Outcome::new(task.version_id(), 1_000_000, done())])
        .wait_timeout(StdDuration::from_secs(5))
        .expect("validation should not stall the store");
    assert!(added.is_ok());
}

#[test]
fn test_outcome_update_cannot_take_occupied_slot() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);
    let added = store
        .add(vec![
            Outcome::new(task.version_id(), 1, done()),
            Outcome::new(task.version_id(), 2, done()),
        ])
        .wait()
        .unwrap();

    let mut moved = added[0].clone();
    moved.occurrence_index = 2;
    let result = store.update(vec![moved]).wait();
    assert!(matches!(
        result,
        Err(StoreError::DuplicateOutcome {
            occurrence_index: 2,
            ..
        })
    ));

    // Past the end of a one-off task.
    let pill = Task::new("pill", None, Schedule::once(Utc::now())).effective(Utc::now());
    let pill = store.add(vec![pill]).wait().unwrap().remove(0);
    let mut retargeted = added[0].clone();
    retargeted.task_version_id = pill.version_id();
    retargeted.occurrence_index = 3;
    assert!(matches!(
        store.update(vec![retargeted]).wait(),
        Err(StoreError::InvalidOccurrence { .. })
    ));

    // Editing values in place keeps the slot.
    let mut edited = added[0].clone();
    edited.values = vec![OutcomeValue::new(ValueKind::Integer(3))];
    store.update(vec![edited]).wait().unwrap();

    let in_slot: Vec<Outcome> = store
        .fetch::<Outcome>(Query::new())
        .wait()
        .unwrap()
        .into_iter()
        .filter(|o| o.occurrence_index == 2)
        .collect();
    assert_eq!(in_slot.len(), 1);
    store.check_integrity().wait().unwrap();
}

// --- Schedule Validation ---

#[test]
fn test_unrepresentable_schedule_rejected() {
    let store = memory_store();
    let start = Utc::now();
    let element = ScheduleElement {
        duration_seconds: i64::MAX,
        ..ScheduleElement::once(start)
    };
    let task = Task::new("forever", None, Schedule::new(vec![element])).effective(start);

    assert!(matches!(
        store.add(vec![task]).wait(),
        Err(StoreError::InvalidSchedule { ref id, .. }) if id == "forever"
    ));

    // The store keeps working.
    store.add(vec![daily_task("walk")]).wait().unwrap();
    let interval = DateInterval::new(start - Duration::days(2), start);
    assert_eq!(store.fetch_events("walk", interval).wait().unwrap().len(), 2);
}

// --- Chain Validation ---

#[test]
fn test_add_existing_id() {
    let store = memory_store();
    store.add(vec![CarePlan::new("plan", "A")]).wait().unwrap();

    let result = store.add(vec![CarePlan::new("plan", "B")]).wait();
    assert!(matches!(
        result,
        Err(StoreError::IdConflict { kind: EntityKind::CarePlan, ref id }) if id == "plan"
    ));

    // Ids are scoped per kind.
    store.add(vec![daily_task("plan")]).wait().unwrap();

    // Adding the very same value twice is the same conflict.
    let value = CarePlan::new("twice", "Same");
    store.add(vec![value.clone()]).wait().unwrap();
    assert!(matches!(
        store.add(vec![value]).wait(),
        Err(StoreError::IdConflict { .. })
    ));
}

#[test]
fn test_same_id_twice_in_one_call() {
    let store = memory_store();
    let result = store
        .add(vec![CarePlan::new("plan", "A"), CarePlan::new("plan", "B")])
        .wait();
    assert!(matches!(result, Err(StoreError::AmbiguousHead { .. })));

    let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert!(plans.is_empty());
}

#[test]
fn test_update_missing_record() {
    let store = memory_store();
    let result = store.update(vec![CarePlan::new("ghost", "Boo")]).wait();
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
    assert_eq!(result.unwrap_err().category(), ErrorCategory::NotFound);
}

#[test]
fn test_update_and_delete_after_delete() {
    let store = memory_store();
    let plan = store.add(vec![CarePlan::new("plan", "A")]).wait().unwrap().remove(0);
    store.delete(vec![plan.clone()]).wait().unwrap();

    assert!(matches!(
        store.update(vec![CarePlan::new("plan", "B")]).wait(),
        Err(StoreError::Deleted { .. })
    ));
    assert!(matches!(
        store.delete(vec![plan]).wait(),
        Err(StoreError::Deleted { .. })
    ));
}

#[test]
fn test_dangling_relationship() {
    let store = memory_store();
    let orphan = daily_task("walk").in_care_plan(VersionId::new());
    assert!(matches!(
        store.add(vec![orphan.clone()]).wait(),
        Err(StoreError::DanglingRelationship { .. })
    ));

    let relaxed = Store::open(StoreConfig {
        allow_missing_relationships: true,
        ..StoreConfig::in_memory("relaxed")
    })
    .unwrap();
    relaxed.add(vec![orphan]).wait().unwrap();
}

#[test]
fn test_relationship_to_wrong_kind() {
    let store = memory_store();
    let task = store.add(vec![daily_task("walk")]).wait().unwrap().remove(0);

    // A care plan must point at a patient, not a task.
    let plan = CarePlan::new("plan", "Rehab").for_patient(task.version_id());
    assert!(matches!(
        store.add(vec![plan]).wait(),
        Err(StoreError::DanglingRelationship { .. })
    ));
}

#[test]
fn test_failed_call_writes_nothing() {
    let store = memory_store();
    store.add(vec![CarePlan::new("existing", "X")]).wait().unwrap();
    let handle = store.subscribe(SubscriptionFilter::all());

    let result = store
        .add(vec![CarePlan::new("new", "Y"), CarePlan::new("existing", "Z")])
        .wait();
    assert!(result.is_err());

    let stats = store.stats().wait().unwrap();
    assert_eq!(stats.version_count, 1);
    assert_eq!(stats.commit_count, 1);
    assert!(handle.drain_changes().is_empty());
}

// --- Open Errors ---

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::on_disk("locked", dir.path().join("store"));
    let _first = Store::open(config.clone()).unwrap();

    let err = Store::open(config).unwrap_err();
    assert!(matches!(err, StoreError::Locked));
    assert!(err.is_retryable());
}

#[test]
fn test_open_missing_without_create() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        create_if_missing: false,
        ..StoreConfig::on_disk("missing", dir.path().join("nowhere"))
    };
    assert!(matches!(Store::open(config), Err(StoreError::NotInitialized)));
}

#[test]
fn test_corrupt_log_detected() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::on_disk("corrupt", dir.path().join("store"));

    {
        let store = Store::open(config.clone()).unwrap();
        store.add(vec![CarePlan::new("a", "A")]).wait().unwrap();
        store.add(vec![CarePlan::new("b", "B")]).wait().unwrap();
    }

    // Flip a byte inside the first frame's payload.
    let log_path = dir.path().join("store").join("records.log");
    let mut file = OpenOptions::new().read(true).write(true).open(&log_path).unwrap();
    file.seek(SeekFrom::Start(12)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    let err = Store::open(config).unwrap_err();
    assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Corruption);
}

#[test]
fn test_torn_tail_recovered() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::on_disk("torn", dir.path().join("store"));

    {
        let store = Store::open(config.clone()).unwrap();
        store.add(vec![CarePlan::new("a", "A")]).wait().unwrap();
        store.add(vec![CarePlan::new("b", "B")]).wait().unwrap();
    }

    let log_path = dir.path().join("store").join("records.log");
    let len = fs::metadata(&log_path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&log_path)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let store = Store::open(config).unwrap();
    let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].id(), "a");
}

#[test]
fn test_foreign_log_rejected() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::on_disk("foreign", dir.path().join("store"));
    drop(Store::open(config.clone()).unwrap());

    fs::write(dir.path().join("store").join("records.log"), b"not a log at all").unwrap();
    assert!(matches!(Store::open(config), Err(StoreError::InvalidFormat(_))));
}

// --- Classification ---

#[test]
fn test_validation_errors_not_retryable() {
    let store = memory_store();
    store.add(vec![CarePlan::new("plan", "A")]).wait().unwrap();
    let err = store.add(vec![CarePlan::new("plan", "A")]).wait().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("plan"));
}
