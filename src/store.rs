use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use tokio::{
    sync::broadcast::{error::RecvError, Receiver},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{ClientResult, OperationsClient},
    lru::LruCache,
    merge::merge_operation_details,
    signal::{Notification, Signal, SignalBus},
    stream::{StreamUpdate, TerminalPolicy},
};

pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(25) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub force: bool,
}

impl FetchOptions {
    pub const FORCE: Self = Self { force: true };
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Served from the cache without touching the network.
    Cached(Value),
    /// Fetched and applied.
    Applied(Value),
    /// A newer fetch for the same operation was issued first; nothing applied.
    Superseded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Payload was not a JSON object.
    Ignored,
    /// The operation is neither cached nor displayed.
    Untracked,
    Merged,
    /// Merged, and the update was the first terminal one for the operation;
    /// the caller should re-fetch it once.
    Reconcile,
}

/// What the detail panel currently shows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetailView {
    pub selected: Option<String>,
    pub detail: Option<Value>,
    pub loading: bool,
}

struct InFlight {
    sequence: u64,
    token: CancellationToken,
}

struct StoreState {
    cache: LruCache<String, Value>,
    selected: Option<String>,
    detail: Option<Value>,
    sequence: u64,
    in_flight: HashMap<String, InFlight>,
    reconciled: HashSet<String>,
}

impl StoreState {
    fn select(&mut self, id: &str) {
        if self.selected.as_deref() != Some(id) {
            self.selected = Some(id.to_string());
            self.detail = self.cache.peek(id).cloned();
        }
    }

    fn is_selected(&self, id: &str) -> bool {
        self.selected.as_deref() == Some(id)
    }

    /// Caches `record`; an evicted operation also loses its reconciled mark.
    fn cache_put(&mut self, id: &str, record: Value) {
        if let Some((evicted, _)) = self.cache.put(id.to_string(), record) {
            self.reconciled.remove(&evicted);
        }
    }
}

/// Clears an `in_flight` entry when its fetch future is dropped before
/// completing. Only the entry with the same sequence is removed.
struct InFlightGuard<'a> {
    state: &'a Mutex<StoreState>,
    id: &'a str,
    sequence: u64,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state
            .in_flight
            .get(self.id)
            .is_some_and(|in_flight| in_flight.sequence == self.sequence)
        {
            debug!(operation_id = self.id, sequence = self.sequence, "detail fetch dropped");
            state.in_flight.remove(self.id);
        }
    }
}

/// Fetches, caches and merges operation details for a detail panel.
///
/// Clones share the same cache and selection.
pub struct DetailStore<C> {
    client: Arc<C>,
    state: Arc<Mutex<StoreState>>,
    bus: SignalBus,
    policy: Arc<TerminalPolicy>,
}

impl<C> Clone for DetailStore<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            state: Arc::clone(&self.state),
            bus: self.bus.clone(),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<C: OperationsClient + 'static> DetailStore<C> {
    pub fn new(client: Arc<C>, bus: SignalBus) -> Self {
        Self::with_options(client, bus, DEFAULT_CACHE_CAPACITY, TerminalPolicy::default())
    }

    pub fn with_options(
        client: Arc<C>,
        bus: SignalBus,
        capacity: NonZeroUsize,
        policy: TerminalPolicy,
    ) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(StoreState {
                cache: LruCache::new(capacity),
                selected: None,
                detail: None,
                sequence: 0,
                in_flight: HashMap::new(),
                reconciled: HashSet::new(),
            })),
            bus,
            policy: Arc::new(policy),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Selects `id` for display and loads its detail.
    ///
    /// Fetch failures are published as a [`Notification`] and returned; the
    /// cache and display record keep their previous contents.
    pub async fn fetch_detail(&self, id: &str, options: FetchOptions) -> ClientResult<FetchOutcome> {
        self.fetch(id, options, true).await
    }

    async fn fetch(&self, id: &str, options: FetchOptions, select: bool) -> ClientResult<FetchOutcome> {
        let (sequence, token) = {
            let mut state = self.state();
            if select {
                state.select(id);
            }

            if !options.force {
                if let Some(record) = state.cache.get(id).cloned() {
                    debug!(operation_id = id, "detail cache hit");
                    if state.is_selected(id) {
                        state.detail = Some(record.clone());
                    }
                    return Ok(FetchOutcome::Cached(record));
                }
            }

            state.sequence += 1;
            let sequence = state.sequence;
            let token = CancellationToken::new();
            let previous = state.in_flight.insert(
                id.to_string(),
                InFlight {
                    sequence,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
            }
            (sequence, token)
        };
        let mut guard = InFlightGuard {
            state: &self.state,
            id,
            sequence,
            armed: true,
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.client.get_operation(id) => Some(result),
        };

        guard.disarm();
        let mut state = self.state();
        let is_latest = state
            .in_flight
            .get(id)
            .is_some_and(|in_flight| in_flight.sequence == sequence);
        let Some(result) = result.filter(|_| is_latest) else {
            debug!(operation_id = id, sequence, "dropping superseded detail fetch");
            return Ok(FetchOutcome::Superseded);
        };
        state.in_flight.remove(id);

        match result {
            Ok(record) => {
                state.cache_put(id, record.clone());
                if state.is_selected(id) {
                    state.detail = Some(record.clone());
                }
                Ok(FetchOutcome::Applied(record))
            }
            Err(err) => {
                drop(state);
                warn!(operation_id = id, error = %err, "failed to load operation details");
                self.bus.notify(Notification::error(
                    "Failed to load operation details",
                    &err,
                ));
                Err(err)
            }
        }
    }

    /// Merges a streamed update into the cached and displayed record.
    pub fn apply_stream_update(&self, update: &StreamUpdate) -> StreamOutcome {
        if !update.payload.is_object() {
            debug!(operation_id = %update.operation_id, "ignoring non-object stream payload");
            return StreamOutcome::Ignored;
        }

        let id = update.operation_id.as_str();
        let mut state = self.state();
        let displayed = state.is_selected(id);
        let cached = state.cache.contains(id);
        if !displayed && !cached {
            return StreamOutcome::Untracked;
        }

        let base = match state.cache.peek(id) {
            Some(record) => Some(record.clone()),
            None => state.detail.clone(),
        };
        let merged = merge_operation_details(
            base.as_ref(),
            &update.payload,
            id,
            Some(&update.stream_meta()),
        );
        if let Some(merged) = merged {
            if cached {
                state.cache_put(id, merged.clone());
            }
            if displayed {
                state.detail = Some(merged);
            }
        }

        if self.policy.is_terminal(update) && state.reconciled.insert(id.to_string()) {
            debug!(operation_id = id, event_type = %update.event_type, "terminal update, reconciling");
            StreamOutcome::Reconcile
        } else {
            StreamOutcome::Merged
        }
    }

    /// Applies `update` and, when it is the first terminal update for its
    /// operation, re-fetches the operation once.
    pub async fn handle_stream_update(&self, update: &StreamUpdate) -> StreamOutcome {
        let outcome = self.apply_stream_update(update);
        if outcome == StreamOutcome::Reconcile {
            self.reconcile(&update.operation_id).await;
        }
        outcome
    }

    async fn reconcile(&self, id: &str) {
        // failures are already published on the bus
        _ = self.fetch(id, FetchOptions::FORCE, false).await;
    }

    /// Applies stream updates from `signals` in arrival order until
    /// `shutdown` is cancelled or the bus closes. Reconcile fetches run on
    /// their own tasks so they never hold up later updates.
    pub fn listen(self, mut signals: Receiver<Signal>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    biased;
                    signal = signals.recv() => signal,
                    _ = shutdown.cancelled() => break,
                };

                match signal {
                    Ok(Signal::OperationStreamUpdate(update)) => {
                        if self.apply_stream_update(&update) == StreamOutcome::Reconcile {
                            let store = self.clone();
                            tokio::spawn(async move {
                                store.reconcile(&update.operation_id).await;
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "stream listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn snapshot(&self) -> DetailView {
        let state = self.state();
        DetailView {
            selected: state.selected.clone(),
            detail: state.detail.clone(),
            loading: state
                .selected
                .as_ref()
                .is_some_and(|id| state.in_flight.contains_key(id)),
        }
    }

    /// Cached record for `id`, without affecting recency.
    pub fn cached(&self, id: &str) -> Option<Value> {
        self.state().cache.peek(id).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.state().cache.len()
    }

    /// Drops the cache entry and the reconciled mark for `id`.
    pub fn forget(&self, id: &str) {
        let mut state = self.state();
        state.cache.remove(id);
        state.reconciled.remove(id);
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.cache.clear();
        state.reconciled.clear();
        state.selected = None;
        state.detail = None;
    }
}
