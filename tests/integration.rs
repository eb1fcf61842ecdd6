//! Integration tests for the record store.

use carestore::{
    CarePlan, Category, Contact, DateInterval, Entity, EntityKind, Outcome, OutcomeValue,
    Patient, PersonName, Query, Record, Schedule, SortDescriptor, SortKey, Store, StoreConfig,
    SubscriptionFilter, Task, ValueKind,
};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn memory_store() -> Store {
    Store::open(StoreConfig::in_memory("integration")).unwrap()
}

fn disk_config(dir: &TempDir) -> StoreConfig {
    StoreConfig::on_disk("integration", dir.path().join("store"))
}

fn daily_task(id: &str, title: &str) -> Task {
    let start = Utc::now() - Duration::days(7);
    Task::new(id, Some(title.to_string()), Schedule::daily(start, None)).effective(start)
}

// --- Realistic Workflow Tests ---

#[test]
fn test_care_plan_workflow() {
    let store = memory_store();

    let patient = store
        .add(vec![Patient::new("ada", PersonName::new("Ada", "Lovelace"))])
        .wait()
        .unwrap()
        .remove(0);
    let plan = store
        .add(vec![CarePlan::new("rehab", "Knee Rehab").for_patient(patient.version_id())])
        .wait()
        .unwrap()
        .remove(0);
    let task = store
        .add(vec![daily_task("stretch", "Stretch").in_care_plan(plan.version_id())])
        .wait()
        .unwrap()
        .remove(0);
    store
        .add(vec![Contact::new("dr-b", PersonName::new("Jane", "Bones")).in_care_plan(plan.version_id())])
        .wait()
        .unwrap();

    let outcome = Outcome::new(
        task.version_id(),
        2,
        vec![OutcomeValue::new(ValueKind::Integer(12)).with_units("reps")],
    );
    store.add(vec![outcome]).wait().unwrap();

    let tasks: Vec<Task> = store
        .fetch(Query::new().related_to(vec![plan.version_id()]))
        .wait()
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title.as_deref(), Some("Stretch"));

    let outcomes: Vec<Outcome> = store
        .fetch(Query::new().related_to(vec![task.version_id()]))
        .wait()
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].occurrence_index, 2);

    store.check_integrity().wait().unwrap();
}

#[test]
fn test_update_builds_chain() {
    let store = memory_store();
    let original = store
        .add(vec![CarePlan::new("plan", "v0")])
        .wait()
        .unwrap()
        .remove(0);

    let mut previous = original.version_id();
    for i in 1..=3 {
        let next = store
            .update(vec![CarePlan::new("plan", format!("v{}", i))])
            .wait()
            .unwrap()
            .remove(0);
        assert_ne!(next.version_id(), previous);
        assert_eq!(next.header.previous_version_id, Some(previous));
        assert!(next.header.updated_date.is_some());
        previous = next.version_id();
    }

    let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].title, "v3");

    let stats = store.stats().wait().unwrap();
    assert_eq!(stats.chain_count, 1);
    assert_eq!(stats.version_count, 4);
}

#[test]
fn test_delete_hides_head_but_keeps_history() {
    let store = memory_store();
    let added = store
        .add(vec![CarePlan::new("plan", "Rehab")])
        .wait()
        .unwrap()
        .remove(0);
    let before_delete = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));

    let deleted = store.delete(vec![added.clone()]).wait().unwrap().remove(0);
    assert!(deleted.header.deleted_date.is_some());
    assert_eq!(deleted.header.previous_version_id, Some(added.version_id()));

    let live: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert!(live.is_empty());

    let historical: Vec<CarePlan> = store
        .fetch(Query::new().as_of(before_delete))
        .wait()
        .unwrap();
    assert_eq!(historical.len(), 1);
    assert_eq!(historical[0].version_id(), added.version_id());

    let stats = store.stats().wait().unwrap();
    assert_eq!(stats.deleted_count, 1);
}

#[test]
fn test_add_revives_deleted_record() {
    let store = memory_store();
    let first = store.add(vec![CarePlan::new("plan", "One")]).wait().unwrap().remove(0);
    let tomb = store.delete(vec![first]).wait().unwrap().remove(0);

    let handle = store.subscribe(SubscriptionFilter::kind(EntityKind::CarePlan));
    let revived = store.add(vec![CarePlan::new("plan", "Two")]).wait().unwrap().remove(0);
    assert_eq!(revived.header.previous_version_id, Some(tomb.version_id()));

    let events = handle.drain_changes();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, Category::Add);

    let live: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(live[0].title, "Two");
}

#[test]
fn test_readd_same_value_after_delete() {
    let store = memory_store();
    let plan = CarePlan::new("plan", "Rehab");

    let first = store.add(vec![plan.clone()]).wait().unwrap().remove(0);
    assert_ne!(first.version_id(), plan.version_id());
    store.delete(vec![plan.clone()]).wait().unwrap();

    let revived = store.add(vec![plan.clone()]).wait().unwrap().remove(0);
    assert_ne!(revived.version_id(), first.version_id());

    // Subscribed strictly after the commit: nothing arrives.
    let late = store.subscribe(SubscriptionFilter::all());
    assert!(late.drain_changes().is_empty());

    let live: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].version_id(), revived.version_id());
    assert_eq!(store.stats().wait().unwrap().version_count, 3);
    assert!(late.try_recv().is_err());
}

#[test]
fn test_as_of_resolution() {
    let store = memory_store();
    let base = Utc::now() - Duration::days(10);

    store
        .add(vec![CarePlan::new("plan", "first").effective(base)])
        .wait()
        .unwrap();
    store
        .update(vec![CarePlan::new("plan", "second").effective(base + Duration::days(5))])
        .wait()
        .unwrap();

    let at = |t| -> String {
        let plans: Vec<CarePlan> = store.fetch(Query::new().as_of(t)).wait().unwrap();
        plans.first().map(|p| p.title.clone()).unwrap_or_default()
    };

    assert_eq!(at(base - Duration::days(1)), "");
    assert_eq!(at(base + Duration::days(1)), "first");
    assert_eq!(at(base + Duration::days(5)), "second");
    assert_eq!(at(Utc::now() + Duration::days(30)), "second");

    let window = DateInterval::new(base, base + Duration::days(2));
    let in_window: Vec<CarePlan> = store.fetch(Query::new().in_interval(window)).wait().unwrap();
    assert_eq!(in_window[0].title, "first");
}

#[test]
fn test_combined_transaction() {
    let store = memory_store();
    store
        .add(vec![daily_task("a", "A"), daily_task("b", "B")])
        .wait()
        .unwrap();
    let handle = store.subscribe(SubscriptionFilter::all());

    let a2 = daily_task("a", "A2").into_record();
    let c = daily_task("c", "C").into_record();
    let b = daily_task("b", "B").into_record();
    let result = store
        .combined_add_update_delete(vec![a2, c], vec![b])
        .wait()
        .unwrap();

    assert_eq!(result.added.len(), 1);
    assert_eq!(result.added[0].id(), "c");
    assert_eq!(result.updated.len(), 1);
    assert_eq!(result.updated[0].id(), "a");
    assert_eq!(result.deleted.len(), 1);
    assert_eq!(result.deleted[0].id(), "b");

    let categories: Vec<Category> = handle.drain_changes().iter().map(|e| e.category).collect();
    assert_eq!(categories, vec![Category::Update, Category::Add, Category::Delete]);

    let titles: Vec<String> = store
        .fetch::<Task>(Query::new().sorted_by(SortDescriptor::ascending(SortKey::Id)))
        .wait()
        .unwrap()
        .into_iter()
        .filter_map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["A2", "C"]);
}

#[test]
fn test_events_pair_outcomes() {
    let store = memory_store();
    let start = Utc::now() - Duration::days(3);
    let task = Task::new("walk", Some("Walk".into()), Schedule::daily(start, None)).effective(start);
    let task = store.add(vec![task]).wait().unwrap().remove(0);

    store
        .add(vec![Outcome::new(
            task.version_id(),
            1,
            vec![OutcomeValue::new(ValueKind::Boolean(true))],
        )])
        .wait()
        .unwrap();

    let interval = DateInterval::new(start, start + Duration::days(3));
    let events = store.fetch_events("walk", interval).wait().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events[0].outcome.is_none());
    assert_eq!(events[1].outcome.as_ref().unwrap().occurrence_index, 1);
    assert!(events[2].outcome.is_none());
}

#[test]
fn test_listener_sees_committed_state() {
    let store = memory_store();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    store.listen(
        SubscriptionFilter::kind(EntityKind::Patient).categories(vec![Category::Add]),
        move |event| {
            assert!(event.origin.is_alive());
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    store
        .add(vec![
            Patient::new("a", PersonName::new("A", "One")),
            Patient::new("b", PersonName::new("B", "Two")),
        ])
        .wait()
        .unwrap();

    // Dispatch happens before the completion resolves.
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// --- Persistence Tests ---

#[test]
fn test_persistence() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = disk_config(&dir);

    let plan_version = {
        let store = Store::open(config.clone()).unwrap();
        store.add(vec![CarePlan::new("plan", "v1")]).wait().unwrap();
        let updated = store
            .update(vec![CarePlan::new("plan", "v2")])
            .wait()
            .unwrap()
            .remove(0);
        store.add(vec![daily_task("t", "T")]).wait().unwrap();
        updated.version_id()
    };

    let store = Store::open(config).unwrap();
    let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].version_id(), plan_version);
    assert_eq!(plans[0].title, "v2");

    let stats = store.stats().wait().unwrap();
    assert_eq!(stats.version_count, 3);
    assert_eq!(stats.commit_count, 0);
    assert!(stats.log_size_bytes > 0);
    store.check_integrity().wait().unwrap();
}

#[test]
fn test_reset_erases_everything() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = disk_config(&dir);

    {
        let store = Store::open(config.clone()).unwrap();
        store.add(vec![CarePlan::new("plan", "v1")]).wait().unwrap();
        store.reset().wait().unwrap();

        let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
        assert!(plans.is_empty());
        assert_eq!(store.stats().wait().unwrap().version_count, 0);

        // The id is free again.
        store.add(vec![CarePlan::new("plan", "fresh")]).wait().unwrap();
    }

    let store = Store::open(config).unwrap();
    let plans: Vec<CarePlan> = store.fetch(Query::new()).wait().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].title, "fresh");
}

#[test]
fn test_untyped_fetch() {
    let store = memory_store();
    store.add(vec![CarePlan::new("plan", "Rehab")]).wait().unwrap();

    let records = store
        .fetch_records(EntityKind::CarePlan, Query::new())
        .wait()
        .unwrap();
    assert!(matches!(records.as_slice(), [Record::CarePlan(p)] if p.title == "Rehab"));
    assert!(store
        .fetch_records(EntityKind::Task, Query::new())
        .wait()
        .unwrap()
        .is_empty());
}

#[test]
fn test_stores_are_independent() {
    let a = memory_store();
    let b = memory_store();
    a.add(vec![CarePlan::new("plan", "A")]).wait().unwrap();
    b.add(vec![CarePlan::new("plan", "B")]).wait().unwrap();

    let from_a: Vec<CarePlan> = a.fetch(Query::new()).wait().unwrap();
    let from_b: Vec<CarePlan> = b.fetch(Query::new()).wait().unwrap();
    assert_eq!(from_a[0].title, "A");
    assert_eq!(from_b[0].title, "B");
}
