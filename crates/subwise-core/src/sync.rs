//! Remote-sync state container
//!
//! One container per collection (subscriptions, categories, notifications)
//! mirrors the signed-in user's rows. It is a small state machine:
//!
//! ```text
//! uninitialized --owner known--> loading --fetch ok--> ready
//!                                    \---fetch failed--> error (items cleared)
//! any --sign out--> uninitialized (items cleared, feed closed)
//! ```
//!
//! The reducer ([`Collection`]) is pure. [`SyncedCollection`] runs it inside a
//! tokio task that is the only writer: bulk fetch results, change-feed events
//! and reconciled write responses all arrive as commands on one channel and
//! are applied in order. Readers get snapshots through a `watch` channel.
//!
//! Change events are applied only while ready. Events and reconciled writes
//! arriving during a load are held back and replayed, in arrival order, once
//! the load lands. Each fetch carries a generation number and results from
//! superseded fetches are dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::remote::{fetch_all, ChangeEvent, RawChange, Record, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Error(String),
}

impl SyncPhase {
    pub fn is_settled(&self) -> bool {
        matches!(self, SyncPhase::Ready | SyncPhase::Error(_))
    }
}

/// Inputs to the reducer
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction<T> {
    /// A bulk fetch started
    Begin,
    Loaded(Vec<T>),
    Failed(String),
    Change(ChangeEvent<T>),
    /// Reconcile a row returned by a direct write
    Upsert(T),
    /// Reconcile a direct delete
    Remove(String),
    /// Owner went away
    Reset,
}

/// Pure reducer state for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    phase: SyncPhase,
    items: Vec<T>,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            items: Vec::new(),
        }
    }

    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Apply one action; returns whether anything changed
    pub fn apply(&mut self, action: SyncAction<T>) -> bool {
        match action {
            SyncAction::Begin => self.set_phase(SyncPhase::Loading),
            SyncAction::Loaded(items) => {
                self.items = items;
                self.phase = SyncPhase::Ready;
                true
            }
            SyncAction::Failed(message) => {
                self.items.clear();
                self.phase = SyncPhase::Error(message);
                true
            }
            SyncAction::Reset => {
                let changed = self.phase != SyncPhase::Uninitialized || !self.items.is_empty();
                self.items.clear();
                self.phase = SyncPhase::Uninitialized;
                changed
            }
            SyncAction::Change(_) if self.phase != SyncPhase::Ready => false,
            // Writes also show while a reload is in flight
            SyncAction::Upsert(_) | SyncAction::Remove(_)
                if !matches!(self.phase, SyncPhase::Ready | SyncPhase::Loading) =>
            {
                false
            }
            SyncAction::Change(ChangeEvent::Insert(item)) | SyncAction::Upsert(item) => {
                self.upsert(item)
            }
            SyncAction::Change(ChangeEvent::Update(item)) => self.replace(item),
            SyncAction::Change(ChangeEvent::Delete(id)) | SyncAction::Remove(id) => {
                self.remove(&id)
            }
        }
    }

    fn set_phase(&mut self, phase: SyncPhase) -> bool {
        let changed = self.phase != phase;
        self.phase = phase;
        changed
    }

    /// Replace by id, or insert at the sort position; false if nothing changed
    fn upsert(&mut self, item: T) -> bool {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id() == item.id()) {
            return Self::overwrite(existing, item);
        }
        let index = self
            .items
            .partition_point(|i| T::sort_cmp(i, &item) != std::cmp::Ordering::Greater);
        self.items.insert(index, item);
        true
    }

    /// Replace by id; absent ids and identical rows are ignored
    fn replace(&mut self, item: T) -> bool {
        match self.items.iter_mut().find(|i| i.id() == item.id()) {
            Some(existing) => Self::overwrite(existing, item),
            None => false,
        }
    }

    fn overwrite(existing: &mut T, item: T) -> bool {
        if *existing == item {
            return false;
        }
        *existing = item;
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id() != id);
        self.items.len() != before
    }
}

/// Published snapshot of a collection
#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    pub phase: SyncPhase,
    pub items: Arc<Vec<T>>,
    /// Latest fetch generation requested when this state was published
    pub generation: u64,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            items: Arc::new(Vec::new()),
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Refetch the whole collection after every change event
    pub resync_on_change: bool,
}

enum Command<T> {
    Fetch(Option<oneshot::Sender<u64>>),
    Fetched {
        generation: u64,
        result: std::result::Result<Vec<T>, String>,
    },
    Change(RawChange),
    Upsert(T, oneshot::Sender<()>),
    Remove(String, oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    Shutdown,
}

/// A collection kept in sync with the backend by a single actor task
pub struct SyncedCollection<T: Record> {
    tx: mpsc::UnboundedSender<Command<T>>,
    state: watch::Receiver<CollectionState<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Record> SyncedCollection<T> {
    /// Start syncing `owner`'s rows: open the change feed, then load
    pub fn start(store: Arc<dyn RemoteStore>, owner: &str, options: SyncOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(CollectionState::default());

        let actor = Actor {
            store,
            owner: owner.to_string(),
            options,
            collection: Collection::new(),
            generation: 0,
            held_back: Vec::new(),
            feed_task: None,
            tx: tx.clone(),
            state_tx,
        };
        let task = tokio::spawn(actor.run(rx));

        Self {
            tx,
            state,
            task: Some(task),
        }
    }

    fn send(&self, command: Command<T>) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::SyncClosed(T::TABLE.as_str()))
    }

    /// Current snapshot
    pub fn state(&self) -> CollectionState<T> {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.state.borrow().phase.clone()
    }

    pub fn items(&self) -> Arc<Vec<T>> {
        self.state.borrow().items.clone()
    }

    /// Receiver that wakes on every published change
    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.state.clone()
    }

    /// Wait until the current load has settled
    pub async fn ready(&self) -> Result<Arc<Vec<T>>> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| s.phase.is_settled())
            .await
            .map_err(|_| Error::SyncClosed(T::TABLE.as_str()))?;
        match &state.phase {
            SyncPhase::Error(message) => Err(Error::Remote(message.clone())),
            _ => Ok(state.items.clone()),
        }
    }

    /// Start a fresh bulk fetch and wait for it to settle
    pub async fn refresh(&self) -> Result<Arc<Vec<T>>> {
        let (reply, generation) = oneshot::channel();
        self.send(Command::Fetch(Some(reply)))?;
        let generation = generation
            .await
            .map_err(|_| Error::SyncClosed(T::TABLE.as_str()))?;

        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| s.generation >= generation && s.phase.is_settled())
            .await
            .map_err(|_| Error::SyncClosed(T::TABLE.as_str()))?;
        match &state.phase {
            SyncPhase::Error(message) => Err(Error::Remote(message.clone())),
            _ => Ok(state.items.clone()),
        }
    }

    /// Reconcile a row returned by a successful write
    pub async fn upsert(&self, item: T) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Upsert(item, ack))?;
        done.await.map_err(|_| Error::SyncClosed(T::TABLE.as_str()))
    }

    /// Reconcile a successful delete
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Remove(id.to_string(), ack))?;
        done.await.map_err(|_| Error::SyncClosed(T::TABLE.as_str()))
    }

    /// Close the feed and go back to uninitialized with no items
    pub async fn reset(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Reset(ack))?;
        done.await.map_err(|_| Error::SyncClosed(T::TABLE.as_str()))
    }

    /// Stop the actor and wait for it to exit
    pub async fn close(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<T: Record> Drop for SyncedCollection<T> {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn decode<T: Record>(raw: &RawChange) -> Option<ChangeEvent<T>> {
    match ChangeEvent::decode(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(table = %T::TABLE, error = %e, "Ignoring malformed change event");
            None
        }
    }
}

struct Actor<T: Record> {
    store: Arc<dyn RemoteStore>,
    owner: String,
    options: SyncOptions,
    collection: Collection<T>,
    generation: u64,
    held_back: Vec<SyncAction<T>>,
    feed_task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Command<T>>,
    state_tx: watch::Sender<CollectionState<T>>,
}

impl<T: Record> Actor<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>) {
        self.open_feed().await;
        self.begin_fetch(None);

        while let Some(command) = rx.recv().await {
            match command {
                Command::Fetch(reply) => self.begin_fetch(reply),
                Command::Fetched { generation, result } => {
                    if generation != self.generation {
                        debug!(table = %T::TABLE, generation, "Dropping stale fetch result");
                        continue;
                    }
                    match result {
                        Ok(items) => {
                            self.collection.apply(SyncAction::Loaded(items));
                            for action in std::mem::take(&mut self.held_back) {
                                self.collection.apply(action);
                            }
                        }
                        Err(message) => {
                            warn!(table = %T::TABLE, user_id = %self.owner, error = %message, "Fetch failed");
                            self.held_back.clear();
                            self.collection.apply(SyncAction::Failed(message));
                        }
                    }
                    self.publish();
                }
                Command::Change(raw) => {
                    let Some(event) = decode::<T>(&raw) else {
                        continue;
                    };
                    if self.loading() {
                        self.held_back.push(SyncAction::Change(event));
                        continue;
                    }
                    let changed = self.collection.apply(SyncAction::Change(event));
                    if changed && self.options.resync_on_change {
                        self.begin_fetch(None);
                    }
                    self.publish();
                }
                Command::Upsert(item, ack) => {
                    if self.loading() {
                        self.held_back.push(SyncAction::Upsert(item.clone()));
                    }
                    self.collection.apply(SyncAction::Upsert(item));
                    self.publish();
                    let _ = ack.send(());
                }
                Command::Remove(id, ack) => {
                    if self.loading() {
                        self.held_back.push(SyncAction::Remove(id.clone()));
                    }
                    self.collection.apply(SyncAction::Remove(id));
                    self.publish();
                    let _ = ack.send(());
                }
                Command::Reset(ack) => {
                    self.close_feed().await;
                    // Invalidate any fetch still in flight
                    self.generation += 1;
                    self.held_back.clear();
                    self.collection.apply(SyncAction::Reset);
                    self.publish();
                    let _ = ack.send(());
                }
                Command::Shutdown => break,
            }
        }

        self.close_feed().await;
        debug!(table = %T::TABLE, "Sync actor stopped");
    }

    async fn open_feed(&mut self) {
        match self.store.subscribe(T::TABLE, &self.owner).await {
            Ok(mut feed) => {
                let tx = self.tx.clone();
                self.feed_task = Some(tokio::spawn(async move {
                    while let Some(raw) = feed.recv().await {
                        if tx.send(Command::Change(raw)).is_err() {
                            break;
                        }
                    }
                }));
            }
            Err(e) => {
                warn!(table = %T::TABLE, error = %e, "Change feed unavailable; collection will not live-update");
            }
        }
    }

    /// Abort the feed forwarder and wait until the feed is dropped
    async fn close_feed(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn begin_fetch(&mut self, reply: Option<oneshot::Sender<u64>>) {
        self.generation += 1;
        let generation = self.generation;
        if let Some(reply) = reply {
            let _ = reply.send(generation);
        }

        self.collection.apply(SyncAction::Begin);
        self.publish();

        let store = self.store.clone();
        let owner = self.owner.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetch_all::<T>(store.as_ref(), &owner)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(Command::Fetched { generation, result });
        });
    }

    fn loading(&self) -> bool {
        self.collection.phase() == &SyncPhase::Loading
    }

    fn publish(&self) {
        self.state_tx.send_replace(CollectionState {
            phase: self.collection.phase().clone(),
            items: Arc::new(self.collection.items().to_vec()),
            generation: self.generation,
        });
    }
}
