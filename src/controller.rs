//! Fetch-request controller.
//!
//! Binds a query value to a store, streams deduplicated results to
//! subscribers and restreams only when the query or the bound store
//! actually changes.

use crate::entities::Entity;
use crate::error::{Result, StoreError};
use crate::query::{Query, QueryMonitor};
use crate::store::{Store, WeakStore};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, warn};

/// A stream of result snapshots plus a hook that ends it.
pub struct QueryResults<R> {
    snapshots: Box<dyn Iterator<Item = Result<Vec<R>>> + Send>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<R: Send + 'static> QueryResults<R> {
    pub fn new<I, C>(snapshots: I, cancel: C) -> Self
    where
        I: Iterator<Item = Result<Vec<R>>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            snapshots: Box::new(snapshots),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A single, fixed snapshot (or error).
    pub fn once(result: Result<Vec<R>>) -> Self {
        Self {
            snapshots: Box::new(std::iter::once(result)),
            cancel: None,
        }
    }

    /// Start `monitor` and stream its snapshots through `map`.
    pub fn from_monitor<T, F>(monitor: QueryMonitor<T>, map: F) -> Self
    where
        T: Entity,
        F: Fn(T) -> R + Send + 'static,
    {
        if let Err(e) = monitor.start() {
            return Self::once(Err(e));
        }
        let monitor = Arc::new(monitor);
        let stream = Arc::clone(&monitor);
        Self::new(
            std::iter::from_fn(move || stream.recv())
                .map(move |snapshot| snapshot.map(|items| items.into_iter().map(&map).collect())),
            move || monitor.stop(),
        )
    }
}

impl<R> fmt::Debug for QueryResults<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// One result row, remembering the store it came from.
///
/// Rows compare equal iff their ids and results are equal; the store is
/// ignored.
#[derive(Clone, Debug)]
pub struct FetchedResult<R> {
    pub id: String,
    pub result: R,
    pub store: WeakStore,
}

impl<R: PartialEq> PartialEq for FetchedResult<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.result == other.result
    }
}

/// A set-like collection of rows, unique by id. Order is not significant
/// for equality.
#[derive(Clone, Debug)]
pub struct FetchedResults<R> {
    rows: Vec<FetchedResult<R>>,
}

impl<R: PartialEq> FetchedResults<R> {
    /// Build from rows, keeping the first row for each id.
    pub fn new(rows: Vec<FetchedResult<R>>) -> Self {
        let mut unique: Vec<FetchedResult<R>> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.iter().any(|r| r.id == row.id) {
                unique.push(row);
            }
        }
        Self { rows: unique }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchedResult<R>> {
        self.rows.iter()
    }

    pub fn get(&self, id: &str) -> Option<&FetchedResult<R>> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<FetchedResult<R>> {
        self.rows
    }
}

impl<R: PartialEq> PartialEq for FetchedResults<R> {
    fn eq(&self, other: &Self) -> bool {
        self.rows.len() == other.rows.len() && self.rows.iter().all(|r| other.rows.contains(r))
    }
}

/// Where the controller's stream stands.
#[derive(Clone, Debug)]
pub enum StreamStatus<Q> {
    /// Not bound to a store.
    Pending,
    /// Streaming `query` from `store`.
    Streaming { query: Q, store: WeakStore },
    /// The stream ended with an error. Still bound, so a new query or an
    /// explicit `stream_results` restarts it.
    Failed { store: WeakStore },
}

type IdFn<R> = Box<dyn Fn(&R) -> String + Send + Sync>;
type ResultsFn<R, Q> = Box<dyn Fn(&Q, &Store) -> QueryResults<R> + Send + Sync>;
type EqualityFn<Q> = Box<dyn Fn(&Q, &Q) -> bool + Send + Sync>;

struct ControllerState<R, Q> {
    query: Q,
    status: StreamStatus<Q>,
    /// Bumped on every restream; a stream thread only publishes while its
    /// generation is current.
    generation: u64,
    cancel: Option<Box<dyn FnOnce() + Send>>,
    results: Option<FetchedResults<R>>,
    subscribers: Vec<Sender<Result<FetchedResults<R>>>>,
}

struct ControllerInner<R, Q> {
    get_id: IdFn<R>,
    get_results: ResultsFn<R, Q>,
    are_queries_equal: EqualityFn<Q>,
    state: Mutex<ControllerState<R, Q>>,
}

impl<R, Q> Drop for ControllerInner<R, Q> {
    fn drop(&mut self) {
        if let Some(cancel) = self.state.get_mut().cancel.take() {
            cancel();
        }
    }
}

/// Streams the results of a query against a bound store.
pub struct FetchRequestController<R, Q> {
    inner: Arc<ControllerInner<R, Q>>,
}

impl<R, Q> FetchRequestController<R, Q>
where
    R: Clone + PartialEq + Send + 'static,
    Q: Clone + PartialEq + Send + 'static,
{
    /// `get_id` names a row; `get_results` turns a query and a store into a
    /// stream of snapshots. Queries are compared with `PartialEq`.
    pub fn new<I, G>(query: Q, get_id: I, get_results: G) -> Self
    where
        I: Fn(&R) -> String + Send + Sync + 'static,
        G: Fn(&Q, &Store) -> QueryResults<R> + Send + Sync + 'static,
    {
        Self::with_query_equality(query, get_id, get_results, |a: &Q, b: &Q| a == b)
    }

    pub fn with_query_equality<I, G, E>(query: Q, get_id: I, get_results: G, are_queries_equal: E) -> Self
    where
        I: Fn(&R) -> String + Send + Sync + 'static,
        G: Fn(&Q, &Store) -> QueryResults<R> + Send + Sync + 'static,
        E: Fn(&Q, &Q) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ControllerInner {
                get_id: Box::new(get_id),
                get_results: Box::new(get_results),
                are_queries_equal: Box::new(are_queries_equal),
                state: Mutex::new(ControllerState {
                    query,
                    status: StreamStatus::Pending,
                    generation: 0,
                    cancel: None,
                    results: None,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    pub fn query(&self) -> Q {
        self.inner.state.lock().query.clone()
    }

    pub fn status(&self) -> StreamStatus<Q> {
        self.inner.state.lock().status.clone()
    }

    /// Latest published rows, if any.
    pub fn fetched_results(&self) -> Option<FetchedResults<R>> {
        self.inner.state.lock().results.clone()
    }

    /// Receive every published snapshot (and the error that ends a stream).
    ///
    /// The latest snapshot, if any, is delivered immediately.
    pub fn subscribe(&self) -> Receiver<Result<FetchedResults<R>>> {
        let (sender, receiver) = unbounded();
        let mut state = self.inner.state.lock();
        if let Some(current) = &state.results {
            let _ = sender.send(Ok(current.clone()));
        }
        state.subscribers.push(sender);
        receiver
    }

    /// Replace the query. Restreams only if it differs from the current one
    /// and a store is bound.
    pub fn update(&self, query: Q) {
        let mut state = self.inner.state.lock();
        if (self.inner.are_queries_equal)(&state.query, &query) {
            return;
        }
        state.query = query;

        let bound = match &state.status {
            StreamStatus::Streaming { store, .. } | StreamStatus::Failed { store } => {
                Some(store.upgrade())
            }
            StreamStatus::Pending => None,
        };
        match bound {
            Some(Some(store)) => restream(&self.inner, &mut state, &store),
            Some(None) => {
                cancel_stream(&mut state);
                state.status = StreamStatus::Pending;
            }
            None => {}
        }
    }

    /// Bind to `store` and stream. A no-op if already streaming the current
    /// query from the same store.
    pub fn stream_results(&self, store: &Store) {
        let mut state = self.inner.state.lock();
        if let StreamStatus::Streaming {
            query,
            store: bound,
        } = &state.status
        {
            if bound.ptr_eq(store) && (self.inner.are_queries_equal)(query, &state.query) {
                return;
            }
        }
        restream(&self.inner, &mut state, store);
    }

    /// End the current stream and unbind.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        cancel_stream(&mut state);
        state.status = StreamStatus::Pending;
    }
}

fn cancel_stream<R, Q>(state: &mut ControllerState<R, Q>) {
    state.generation += 1;
    if let Some(cancel) = state.cancel.take() {
        cancel();
    }
}

fn restream<R, Q>(inner: &Arc<ControllerInner<R, Q>>, state: &mut ControllerState<R, Q>, store: &Store)
where
    R: Clone + PartialEq + Send + 'static,
    Q: Clone + PartialEq + Send + 'static,
{
    cancel_stream(state);
    let generation = state.generation;

    let QueryResults { snapshots, cancel } = (inner.get_results)(&state.query, store);
    state.cancel = cancel;
    state.status = StreamStatus::Streaming {
        query: state.query.clone(),
        store: store.downgrade(),
    };
    debug!(generation, store = ?store.id(), "controller streaming");

    let weak = Arc::downgrade(inner);
    let origin = store.downgrade();
    let spawned = thread::Builder::new()
        .name("carestore-controller".to_string())
        .spawn(move || pump(weak, generation, origin, snapshots));

    if let Err(e) = spawned {
        warn!(error = %e, "failed to start controller stream");
        let error = StoreError::from(e);
        state.subscribers.retain(|s| s.send(Err(error.clone())).is_ok());
        cancel_stream(state);
        state.status = StreamStatus::Pending;
    }
}

/// Forward snapshots while `generation` is current.
fn pump<R, Q>(
    inner: Weak<ControllerInner<R, Q>>,
    generation: u64,
    origin: WeakStore,
    snapshots: Box<dyn Iterator<Item = Result<Vec<R>>> + Send>,
) where
    R: Clone + PartialEq + Send + 'static,
    Q: Clone + PartialEq + Send + 'static,
{
    for snapshot in snapshots {
        let Some(inner) = inner.upgrade() else { return };
        let mut state = inner.state.lock();
        if state.generation != generation {
            return;
        }

        match snapshot {
            Ok(items) => {
                let rows = items
                    .into_iter()
                    .map(|result| FetchedResult {
                        id: (inner.get_id)(&result),
                        result,
                        store: origin.clone(),
                    })
                    .collect();
                let results = FetchedResults::new(rows);
                if state.results.as_ref() == Some(&results) {
                    continue;
                }
                state.results = Some(results.clone());
                state.subscribers.retain(|s| s.send(Ok(results.clone())).is_ok());
            }
            Err(e) => {
                warn!(error = %e, "controller stream failed");
                state.subscribers.retain(|s| s.send(Err(e.clone())).is_ok());
                cancel_stream(&mut state);
                state.status = StreamStatus::Failed { store: origin };
                return;
            }
        }
    }
}

/// Controller over typed records keyed by their ids.
pub type RecordController<T> = FetchRequestController<T, Query>;

impl<T: Entity> FetchRequestController<T, Query> {
    /// Stream `T` records matching a [`Query`] through a [`QueryMonitor`].
    pub fn for_records(query: Query) -> Self {
        Self::new(
            query,
            |record: &T| record.id().to_string(),
            |query: &Query, store: &Store| QueryResults::from_monitor(store.monitor::<T>(query.clone()), |t| t),
        )
    }
}
