//! Main Store handle tying all components together.

use crate::entities::{Entity, Event, Record};
use crate::error::{Result, StoreError};
use crate::notifications::{
    StoreEvent, SubscriptionFilter, SubscriptionHandle, SubscriptionId, SubscriptionManager,
    DEFAULT_BUFFER_SIZE,
};
use crate::query::{Query, QueryMonitor};
use crate::records::{TransactionLog, VersionIndex};
use crate::transaction::{Rules, Staged, Transaction, TransactionResult};
use crate::types::{
    Category, DateInterval, EntityKind, StoreId, StoreStats, SCHEMA_VERSION,
};
use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Human-readable name, used in logs and the manifest.
    pub name: String,

    /// Directory for on-disk stores. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Accept records whose relationship targets do not resolve.
    pub allow_missing_relationships: bool,

    /// Accept re-inserted historical versions as given. Also exempts
    /// superseded outcomes from the slot uniqueness check.
    pub migration_mode: bool,

    /// Sync the log every N commits (0 or 1 = every commit).
    pub sync_interval: u64,

    /// Channel capacity for bus subscribers.
    pub subscription_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            path: None,
            create_if_missing: true,
            allow_missing_relationships: false,
            migration_mode: false,
            sync_interval: 1,
            subscription_buffer: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn on_disk(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    fn rules(&self) -> Rules {
        Rules {
            allow_missing_relationships: self.allow_missing_relationships,
            migration_mode: self.migration_mode,
        }
    }
}

const MANIFEST_FILE: &str = "manifest.json";
const LOG_FILE: &str = "records.log";
const LOCK_FILE: &str = "LOCK";

/// Current store format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    schema_version: u32,
    name: String,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

type Job = Box<dyn FnOnce(&mut StoreState) + Send>;

/// State owned by the store's worker thread.
///
/// Every read and write runs here, one job at a time, in submission order.
pub(crate) struct StoreState {
    index: VersionIndex,
    log: Option<TransactionLog>,
    config: StoreConfig,
    commit_count: u64,
    bus: Arc<SubscriptionManager<StoreState>>,
    origin: WeakStore,
    _lock_file: Option<File>,
}

impl StoreState {
    pub(crate) fn bus(&self) -> &Arc<SubscriptionManager<StoreState>> {
        &self.bus
    }

    pub(crate) fn fetch(&self, kind: EntityKind, query: &Query) -> Result<Vec<Record>> {
        query.evaluate(&self.index, kind)
    }

    pub(crate) fn fetch_as<T: Entity>(&self, query: &Query) -> Result<Vec<T>> {
        self.fetch(T::KIND, query)?
            .into_iter()
            .map(T::from_record)
            .collect()
    }

    /// Run `f` inside a transaction and commit what it staged.
    fn transact<R>(&mut self, f: impl FnOnce(&mut Transaction<'_>) -> Result<R>) -> Result<R> {
        let (result, staged) = {
            let mut txn = Transaction::new(&self.index, self.config.rules(), Utc::now());
            let result = f(&mut txn)?;
            (result, txn.finish())
        };
        self.commit(staged)?;
        Ok(result)
    }

    /// Log, apply, then dispatch.
    fn commit(&mut self, staged: Staged) -> Result<()> {
        if staged.writes.is_empty() {
            return Ok(());
        }

        if let Some(log) = self.log.as_mut() {
            log.append(&staged.writes)?;
        }
        let version_count = staged.writes.len();
        for record in staged.writes {
            self.index.put(record);
        }
        self.commit_count += 1;
        debug!(
            store = %self.config.name,
            versions = version_count,
            events = staged.events.len(),
            "committed transaction"
        );

        let bus = Arc::clone(&self.bus);
        for (category, record) in staged.events {
            let event = StoreEvent {
                kind: record.kind(),
                category,
                record,
                origin: self.origin.clone(),
            };
            bus.broadcast(&event, self);
        }
        Ok(())
    }

    fn events(&self, task_id: &str, interval: DateInterval) -> Result<Vec<Event>> {
        let task = match self.index.resolve(EntityKind::Task, task_id, Some(interval.end))? {
            Some(Record::Task(task)) if !task.header.is_tombstone() => task.clone(),
            _ => {
                return Err(StoreError::NotFound {
                    kind: EntityKind::Task,
                    id: task_id.to_string(),
                })
            }
        };

        let events = task
            .schedule
            .events(&interval)
            .into_iter()
            .map(|e| {
                let outcome = self
                    .index
                    .live_outcomes_in_slot(task.header.version_id, e.occurrence_index)
                    .into_iter()
                    .find_map(|r| match r {
                        Record::Outcome(o) => Some(o.clone()),
                        _ => None,
                    });
                Event {
                    task: task.clone(),
                    occurrence_index: e.occurrence_index,
                    start: e.start,
                    end: e.end,
                    outcome,
                }
            })
            .collect();
        Ok(events)
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.reset()?;
        }
        self.index.clear();
        self.commit_count = 0;
        info!(store = %self.config.name, "store reset");
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            chain_count: self.index.chain_count() as u64,
            version_count: self.index.version_count() as u64,
            deleted_count: self.index.deleted_count() as u64,
            commit_count: self.commit_count,
            log_size_bytes: self.log.as_ref().map_or(0, |l| l.size()),
        }
    }
}

struct StoreInner {
    id: StoreId,
    config: StoreConfig,
    bus: Arc<SubscriptionManager<StoreState>>,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_worker(mut state: StoreState, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        job(&mut state);
    }
    if let Some(log) = state.log.as_mut() {
        if let Err(e) = log.sync() {
            warn!(store = %state.config.name, error = %e, "final log sync failed");
        }
    }
    debug!(store = %state.config.name, "worker stopped");
}

/// Handle to a record store.
///
/// Handles are cheap clones of one shared store. Each store owns a worker
/// thread that runs every operation in submission order; operations return
/// a [`Completion`] instead of blocking the caller. Two handles refer to the
/// same store iff [`Store::ptr_eq`] holds.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open (or create) a store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let (index, log, lock_file) = match &config.path {
            Some(path) => Self::open_on_disk(path, &config)?,
            None => (VersionIndex::new(), None, None),
        };

        let id = StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst));
        let bus = Arc::new(SubscriptionManager::new());
        let mut spawn_error = None;

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let state = StoreState {
                index,
                log,
                config: config.clone(),
                commit_count: 0,
                bus: Arc::clone(&bus),
                origin: WeakStore {
                    inner: weak.clone(),
                },
                _lock_file: lock_file,
            };
            let (sender, receiver) = unbounded();
            let worker = thread::Builder::new()
                .name(format!("carestore-{}", config.name))
                .spawn(move || run_worker(state, receiver));

            match worker {
                Ok(handle) => StoreInner {
                    id,
                    config: config.clone(),
                    bus: Arc::clone(&bus),
                    sender: Some(sender),
                    worker: Some(handle),
                },
                Err(e) => {
                    spawn_error = Some(e);
                    StoreInner {
                        id,
                        config: config.clone(),
                        bus: Arc::clone(&bus),
                        sender: None,
                        worker: None,
                    }
                }
            }
        });

        if let Some(e) = spawn_error {
            return Err(e.into());
        }
        info!(store = %config.name, id = id.0, "store opened");
        Ok(Self { inner })
    }

    fn open_on_disk(
        path: &Path,
        config: &StoreConfig,
    ) -> Result<(VersionIndex, Option<TransactionLog>, Option<File>)> {
        if path.join(MANIFEST_FILE).exists() {
            Self::verify_manifest(path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(path)?;
            Self::write_manifest(path, &config.name)?;
        } else {
            return Err(StoreError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(path)?;
        let (log, entries) = TransactionLog::open(path.join(LOG_FILE), config.sync_interval)?;

        let mut index = VersionIndex::new();
        for entry in entries {
            if entry.schema_version > SCHEMA_VERSION {
                return Err(StoreError::InvalidFormat(format!(
                    "log entry {} has schema version {} (newest supported is {})",
                    entry.sequence, entry.schema_version, SCHEMA_VERSION
                )));
            }
            for record in entry.records {
                index.put(record);
            }
        }
        debug!(
            store = %config.name,
            versions = index.version_count(),
            "replayed transaction log"
        );

        Ok((index, Some(log), Some(lock_file)))
    }

    // --- Identity ---

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.config.path.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// True if both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // --- Work queue ---

    /// Queue a job on the worker. The completion resolves with its result.
    pub(crate) fn submit<T, F>(&self, f: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job: Job = Box::new(move |state| {
            let result = catch_unwind(AssertUnwindSafe(|| f(state)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!(store = %state.config.name, panic = %message, "operation panicked");
                    Err(StoreError::OperationPanicked(message))
                });
            let _ = tx.send(result);
        });
        if let Some(sender) = &self.inner.sender {
            // On failure the job (and its sender) is dropped, which resolves
            // the completion with `StoreClosed`.
            let _ = sender.send(job);
        }
        Completion { receiver: rx }
    }

    // --- Records ---

    /// Insert new records.
    ///
    /// Fails without writing anything if any record's id belongs to a live
    /// record of the same kind, or a relationship does not resolve. Adding
    /// an id whose chain was deleted appends a new live version to it.
    pub fn add<T: Entity>(&self, records: Vec<T>) -> Completion<Vec<T>> {
        self.submit(move |state| {
            state.transact(|txn| {
                records
                    .into_iter()
                    .map(|r| txn.add(r.into_record()).and_then(T::from_record))
                    .collect()
            })
        })
    }

    /// Append a new version to each record's chain.
    ///
    /// The committed versions carry fresh version ids and point back at the
    /// previous heads.
    pub fn update<T: Entity>(&self, records: Vec<T>) -> Completion<Vec<T>> {
        self.submit(move |state| {
            state.transact(|txn| {
                records
                    .into_iter()
                    .map(|r| txn.update(r.into_record()).and_then(T::from_record))
                    .collect()
            })
        })
    }

    /// Retire each record's chain. Returns the tombstone versions.
    pub fn delete<T: Entity>(&self, records: Vec<T>) -> Completion<Vec<T>> {
        self.submit(move |state| {
            state.transact(|txn| {
                records
                    .into_iter()
                    .map(|r| txn.delete(&r.into_record()).and_then(T::from_record))
                    .collect()
            })
        })
    }

    /// Add or update `to_add_or_update` and delete `to_delete` in one
    /// all-or-nothing transaction. Records may be of any kind.
    pub fn combined_add_update_delete(
        &self,
        to_add_or_update: Vec<Record>,
        to_delete: Vec<Record>,
    ) -> Completion<TransactionResult> {
        self.submit(move |state| {
            state.transact(|txn| {
                let mut result = TransactionResult::default();
                for record in to_add_or_update {
                    match txn.upsert(record)? {
                        (Category::Add, r) => result.added.push(r),
                        (_, r) => result.updated.push(r),
                    }
                }
                for record in &to_delete {
                    result.deleted.push(txn.delete(record)?);
                }
                Ok(result)
            })
        })
    }

    /// Fetch records of kind `T` matching `query`.
    pub fn fetch<T: Entity>(&self, query: Query) -> Completion<Vec<T>> {
        self.submit(move |state| state.fetch_as::<T>(&query))
    }

    /// Untyped fetch.
    pub fn fetch_records(&self, kind: EntityKind, query: Query) -> Completion<Vec<Record>> {
        self.submit(move |state| state.fetch(kind, &query))
    }

    /// Scheduled events of a task within `interval`, each paired with its
    /// outcome if one was recorded.
    pub fn fetch_events(&self, task_id: impl Into<String>, interval: DateInterval) -> Completion<Vec<Event>> {
        let task_id = task_id.into();
        self.submit(move |state| state.events(&task_id, interval))
    }

    /// Erase every record.
    pub fn reset(&self) -> Completion<()> {
        self.submit(|state| state.reset())
    }

    pub fn stats(&self) -> Completion<StoreStats> {
        self.submit(|state| Ok(state.stats()))
    }

    /// Walk every chain and outcome reference, reporting the first problem.
    pub fn check_integrity(&self) -> Completion<()> {
        self.submit(|state| state.index.check_integrity())
    }

    /// Force the log to disk.
    pub fn sync(&self) -> Completion<()> {
        self.submit(|state| match state.log.as_mut() {
            Some(log) => log.sync(),
            None => Ok(()),
        })
    }

    // --- Notifications ---

    /// Receive change events matching `filter` on a channel.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.inner
            .bus
            .subscribe(filter, self.inner.config.subscription_buffer)
    }

    /// Run `listener` on the worker thread for every matching change.
    ///
    /// The listener must not wait on this store's completions.
    pub fn listen<F>(&self, filter: SubscriptionFilter, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .listen(filter, Arc::new(move |event: &StoreEvent, _: &StoreState| listener(event)))
    }

    /// Number of live bus subscriptions, listeners included.
    pub fn subscription_count(&self) -> usize {
        self.inner.bus.subscription_count()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.bus.unsubscribe(id);
    }

    /// A live query over records of kind `T`. Call `start()` to begin.
    pub fn monitor<T: Entity>(&self, query: Query) -> QueryMonitor<T> {
        QueryMonitor::new(self, query)
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path, name: &str) -> Result<()> {
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            schema_version: SCHEMA_VERSION,
            name: name.to_string(),
        };
        let mut file = File::create(path.join(MANIFEST_FILE))?;
        file.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let bytes = fs::read(path.join(MANIFEST_FILE))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidFormat(format!("Unreadable manifest: {}", e)))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                manifest.format_version
            )));
        }
        if manifest.schema_version > SCHEMA_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Store schema version {} is newer than {}",
                manifest.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Store {}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}

/// Non-owning reference to a store.
///
/// Held by events, monitors and fetched results so that none of them keep
/// a store alive.
#[derive(Clone, Default)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// True if this refers to `store`.
    pub fn ptr_eq(&self, store: &Store) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&store.inner))
    }

    pub fn same_store(&self, other: &WeakStore) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(store) => write!(f, "WeakStore({:?})", store.id()),
            None => f.write_str("WeakStore(<closed>)"),
        }
    }
}

/// Pending result of a store operation.
///
/// Resolves after the operation's commit and notification dispatch.
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion<T> {
    receiver: Receiver<Result<T>>,
}

impl<T: Send + 'static> Completion<T> {
    /// Block until the operation finishes.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(StoreError::StoreClosed))
    }

    /// Wait up to `timeout`. `None` if the operation is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StoreError::StoreClosed)),
        }
    }

    /// The result if it is ready, without blocking.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::StoreClosed)),
        }
    }

    /// Hand the result to `callback` on a helper thread once ready.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        thread::spawn(move || callback(self.wait()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CarePlan, PersonName, Patient};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig::on_disk("test", dir.path().join("store"))
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(test_config(&dir)).unwrap();

        let path = store.path().unwrap();
        assert!(path.join(MANIFEST_FILE).exists());
        assert!(path.join(LOG_FILE).exists());
        assert!(path.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };
        assert!(matches!(Store::open(config), Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store1 = Store::open(config.clone()).unwrap();

        // Second store should fail to acquire lock
        let result = Store::open(config);
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let store = Store::open(config.clone()).unwrap();
        drop(store);
        assert!(Store::open(config).is_ok());
    }

    #[test]
    fn test_panicking_job_leaves_store_open() {
        let store = Store::open(StoreConfig::in_memory("panics")).unwrap();
        let result = store
            .submit(|_: &mut StoreState| -> Result<()> { panic!("job failure") })
            .wait();
        assert!(matches!(result, Err(StoreError::OperationPanicked(ref m)) if m == "job failure"));

        store.add(vec![CarePlan::new("plan", "Rehab")]).wait().unwrap();
        assert_eq!(store.stats().wait().unwrap().chain_count, 1);
    }

    #[test]
    fn test_identity() {
        let a = Store::open(StoreConfig::in_memory("a")).unwrap();
        let b = Store::open(StoreConfig::in_memory("b")).unwrap();
        let a2 = a.clone();

        assert!(a.ptr_eq(&a2));
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());

        let weak = a.downgrade();
        assert!(weak.ptr_eq(&a));
        assert!(!weak.ptr_eq(&b));
        drop(a);
        assert!(weak.is_alive());
        drop(a2);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_stats() {
        let store = Store::open(StoreConfig::in_memory("stats")).unwrap();
        let patient = Patient::new("p1", PersonName::new("Ada", "Lovelace"));
        store.add(vec![patient.clone()]).wait().unwrap();
        store.update(vec![patient]).wait().unwrap();
        store.add(vec![CarePlan::new("plan", "Rehab")]).wait().unwrap();

        let stats = store.stats().wait().unwrap();
        assert_eq!(stats.chain_count, 2);
        assert_eq!(stats.version_count, 3);
        assert_eq!(stats.commit_count, 3);
        assert_eq!(stats.deleted_count, 0);
        assert_eq!(stats.log_size_bytes, 0);
    }

    #[test]
    fn test_completion_after_close_is_store_closed() {
        let store = Store::open(StoreConfig::in_memory("closing")).unwrap();
        let weak = store.downgrade();
        drop(store);
        assert!(weak.upgrade().is_none());

        let (_tx, rx) = bounded::<Result<()>>(1);
        let pending = Completion { receiver: rx };
        assert!(pending.try_get().is_none());
        drop(_tx);
        assert!(matches!(pending.wait(), Err(StoreError::StoreClosed)));
    }

    #[test]
    fn test_manifest_version_checked() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        drop(Store::open(config.clone()).unwrap());

        let path = config.path.clone().unwrap();
        fs::write(
            path.join(MANIFEST_FILE),
            br#"{"format_version":9,"schema_version":1,"name":"test"}"#,
        )
        .unwrap();
        assert!(matches!(Store::open(config), Err(StoreError::InvalidFormat(_))));
    }
}
