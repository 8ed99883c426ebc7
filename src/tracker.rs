//! Membership orchestration: catalog events in, dispatchers and listener
//! notifications out.
//!
//! Lifecycle: `Created → Populating → Active → Stopped`.
//! - `start()` looks up every matching handle once and stages each new
//!   dispatcher as unbound, because listeners are not attached yet.
//! - `activate()` attaches listeners, fires one bind per staged dispatcher in
//!   creation order, then re-tracks the catalog.
//! - `stop()` runs the departure sequence for every remaining member.
//!
//! All transitions of one tracker are serialized by a reentrant lock, so
//! listeners see binds and unbinds in the order they happened. Listener
//! callbacks run outside the collection lock. A callback may feed events into
//! the same tracker, add a listener or stop it; those calls are queued and
//! applied once the current notification has reached every listener.
use parking_lot::{Mutex, ReentrantMutex};
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    catalog::{Catalog, CatalogEvent, EventSource, Filter, Handle},
    config::TrackerConfig,
    dispatcher::Dispatcher,
    error::{LivebindError, Result},
    listener::{notify, DynListener, ListenerSet, Transition},
    managed::ManagedCollection,
    ordering::OrderingPolicy,
    registry::{ManagedInfo, ManagedRegistry},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackerState {
    Created,
    Populating,
    Active,
    Stopped,
}

pub(crate) struct StopFlag {
    set: AtomicBool,
    notify: Notify,
}

impl StopFlag {
    fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
    fn trigger(&self) {
        if !self.set.swap(true, Ordering::Release) {
            self.notify.notify_waiters();
        }
    }
    fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
    async fn wait(&self) {
        // 先注册等待者再检查标志，避免错过 notify_waiters
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// A request made while a notification is being delivered.
enum Op<S: ?Sized> {
    Arrival(Handle),
    Departure(Handle),
    Listen(DynListener<S>),
    Stop,
}

// 投递期间置位，panic 展开时同样复位
struct Delivery<'a>(&'a AtomicBool);

impl<'a> Delivery<'a> {
    fn begin(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Listeners<S: ?Sized> {
    set: ListenerSet<S>,
    attached: bool,
}

struct TrackerInner<S: ?Sized> {
    id: Uuid,
    name: String,
    filter: Filter,
    catalog: Arc<dyn Catalog<S>>,
    collection: ManagedCollection<S>,
    registry: Option<Arc<dyn ManagedRegistry>>,
    state: Mutex<TrackerState>,
    listeners: Mutex<Listeners<S>>,
    // 监听器就绪前创建的 dispatcher，按创建顺序
    unbound: Mutex<Vec<Arc<Dispatcher<S>>>>,
    transitions: ReentrantMutex<()>,
    // 仅在持有 transitions 锁时读写
    delivering: AtomicBool,
    deferred: Mutex<VecDeque<Op<S>>>,
    event_capacity: usize,
    stop: StopFlag,
}

/// Keeps one managed collection in sync with the catalog. Cheap to clone.
pub struct Tracker<S: ?Sized> {
    inner: Arc<TrackerInner<S>>,
}

impl<S: ?Sized> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct TrackerBuilder<S: ?Sized> {
    name: String,
    catalog: Arc<dyn Catalog<S>>,
    filter: Filter,
    config: TrackerConfig,
    ordering: Option<OrderingPolicy<S>>,
    registry: Option<Arc<dyn ManagedRegistry>>,
    listeners: Vec<DynListener<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> TrackerBuilder<S> {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }
    /// Overrides whatever ordering the config selects.
    pub fn ordering(mut self, ordering: OrderingPolicy<S>) -> Self {
        self.ordering = Some(ordering);
        self
    }
    pub fn registry(mut self, registry: Arc<dyn ManagedRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
    /// Listener attached at `activate()`.
    pub fn listener(mut self, listener: DynListener<S>) -> Self {
        self.listeners.push(listener);
        self
    }
    pub(crate) fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub fn build(self) -> Result<Tracker<S>> {
        let ordering = match self.ordering {
            Some(o) => o,
            None => OrderingPolicy::from_config(&self.config)?,
        };
        let collection = ManagedCollection::new(
            self.config.collection,
            self.config.member_kind.unwrap_or_default(),
            &ordering,
        );
        let mut set = ListenerSet::new();
        for l in self.listeners {
            set.push(l);
        }
        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                id: Uuid::new_v4(),
                name: self.name,
                filter: self.filter,
                catalog: self.catalog,
                collection,
                registry: self.registry,
                state: Mutex::new(TrackerState::Created),
                listeners: Mutex::new(Listeners {
                    set,
                    attached: false,
                }),
                unbound: Mutex::new(Vec::new()),
                transitions: ReentrantMutex::new(()),
                delivering: AtomicBool::new(false),
                deferred: Mutex::new(VecDeque::new()),
                event_capacity: self.config.event_capacity.max(1),
                stop: StopFlag::new(),
            }),
        })
    }
}

impl<S: ?Sized + Send + Sync + 'static> Tracker<S> {
    pub fn builder(name: impl Into<String>, catalog: Arc<dyn Catalog<S>>) -> TrackerBuilder<S> {
        TrackerBuilder {
            name: name.into(),
            catalog,
            filter: Filter::any(),
            config: TrackerConfig::default(),
            ordering: None,
            registry: None,
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    pub fn state(&self) -> TrackerState {
        *self.inner.state.lock()
    }

    /// The consumer-facing view. Every clone observes the same live contents.
    pub fn collection(&self) -> ManagedCollection<S> {
        self.inner.collection.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().set.len()
    }

    /// Dispatchers created before listeners were attached and not yet bound.
    pub fn staged_count(&self) -> usize {
        self.inner.unbound.lock().len()
    }

    /// Slots of the channel created by [`spawn_channel_pump`](Self::spawn_channel_pump).
    pub fn event_capacity(&self) -> usize {
        self.inner.event_capacity
    }

    /// `Created → Populating`: one catalog lookup, every match tracked and staged.
    /// Calling it again is a no-op; calling it after `stop()` fails.
    pub fn start(&self) -> Result<()> {
        let _serial = self.inner.transitions.lock();
        match self.state() {
            TrackerState::Created => {
                self.populate();
                Ok(())
            }
            TrackerState::Populating | TrackerState::Active => Ok(()),
            TrackerState::Stopped => Err(LivebindError::InvalidState("tracker already stopped")),
        }
    }

    fn populate(&self) {
        let inner = &self.inner;
        *inner.state.lock() = TrackerState::Populating;
        if let Some(registry) = &inner.registry {
            registry.register(ManagedInfo {
                id: inner.id,
                name: inner.name.clone(),
                filter: inner.filter.clone(),
                shape: inner.collection.shape(),
            });
        }
        let handles = inner.catalog.lookup(&inner.filter);
        tracing::debug!(tracker = %inner.name, count = handles.len(), "initial population");
        for handle in handles {
            self.track(handle);
        }
    }

    /// `Populating → Active`: attach listeners and drain the staging area.
    /// Starts the tracker first if needed. From inside a listener callback it
    /// is a no-op, since activation has then already begun.
    pub fn activate(&self) -> Result<()> {
        let _serial = self.inner.transitions.lock();
        if self.delivering() {
            return Ok(());
        }
        match self.state() {
            TrackerState::Created => self.populate(),
            TrackerState::Populating => {}
            TrackerState::Active => return Ok(()),
            TrackerState::Stopped => {
                return Err(LivebindError::InvalidState("tracker already stopped"))
            }
        }
        let _delivery = Delivery::begin(&self.inner.delivering);
        let listener_count = {
            let mut l = self.inner.listeners.lock();
            l.attached = true;
            l.set.len()
        };
        tracing::debug!(tracker = %self.inner.name, staged = self.staged_count(), listeners = listener_count, "activating");
        // 逐个取出：回调引发的离开事件执行时，尚未投递的成员仍在暂存区
        while let Some(dispatcher) = self.next_staged() {
            let listeners = self.inner.listeners.lock().set.snapshot();
            notify(&self.inner.name, &listeners, Transition::Bind, &dispatcher);
            self.apply_deferred();
        }
        // 再次全量查询：已存在的 dispatcher 不会重复 bind
        for handle in self.inner.catalog.lookup(&self.inner.filter) {
            if self.state() == TrackerState::Stopped {
                return Ok(());
            }
            self.track(handle);
            self.apply_deferred();
        }
        let mut state = self.inner.state.lock();
        if *state == TrackerState::Populating {
            *state = TrackerState::Active;
        }
        Ok(())
    }

    fn next_staged(&self) -> Option<Arc<Dispatcher<S>>> {
        let mut unbound = self.inner.unbound.lock();
        (!unbound.is_empty()).then(|| unbound.remove(0))
    }

    /// Register a listener. Once active, it first receives a bind for every
    /// current member, before any later transition. Called from a listener
    /// callback, it takes effect after the current notification.
    pub fn add_listener(&self, listener: DynListener<S>) {
        self.submit(Op::Listen(listener));
    }

    pub fn handle_event(&self, event: CatalogEvent) {
        match event {
            CatalogEvent::Arrival(h) => self.on_arrival(h),
            CatalogEvent::Departure(h) => self.on_departure(&h),
        }
    }

    pub fn on_arrival(&self, handle: Handle) {
        self.submit(Op::Arrival(handle));
    }

    pub fn on_departure(&self, handle: &Handle) {
        self.submit(Op::Departure(handle.clone()));
    }

    /// `→ Stopped`: untrack every member and release everything. Idempotent.
    /// Called from a listener callback, it takes effect after the current
    /// notification.
    pub fn stop(&self) {
        self.submit(Op::Stop);
    }

    fn delivering(&self) -> bool {
        self.inner.delivering.load(Ordering::Acquire)
    }

    /// Apply `op` now, or queue it when a listener callback on this thread asked for it.
    fn submit(&self, op: Op<S>) {
        let _serial = self.inner.transitions.lock();
        if self.delivering() {
            self.inner.deferred.lock().push_back(op);
            return;
        }
        let _delivery = Delivery::begin(&self.inner.delivering);
        self.apply(op);
        self.apply_deferred();
    }

    // 调用方持有 transitions 锁且处于投递中；队列锁不能跨 apply 持有
    fn apply_deferred(&self) {
        loop {
            let next = self.inner.deferred.lock().pop_front();
            match next {
                Some(op) => self.apply(op),
                None => break,
            }
        }
    }

    fn apply(&self, op: Op<S>) {
        match op {
            Op::Arrival(handle) => {
                if !self.accepts_events() {
                    tracing::trace!(tracker = %self.inner.name, service = handle.id(), state = ?self.state(), "arrival ignored");
                    return;
                }
                if self.inner.filter.matches(&handle) {
                    self.track(handle);
                }
            }
            Op::Departure(handle) => {
                if !self.accepts_events() {
                    tracing::trace!(tracker = %self.inner.name, service = handle.id(), state = ?self.state(), "departure ignored");
                    return;
                }
                self.untrack(&handle);
            }
            Op::Listen(listener) => self.attach_listener(listener),
            Op::Stop => self.shutdown(),
        }
    }

    fn accepts_events(&self) -> bool {
        matches!(self.state(), TrackerState::Populating | TrackerState::Active)
    }

    fn attach_listener(&self, listener: DynListener<S>) {
        let attached = {
            let mut l = self.inner.listeners.lock();
            l.set.push(listener.clone());
            l.attached
        };
        if !attached {
            return;
        }
        // 仍在暂存区的成员会在 drain 时一并 bind
        let staged = self.inner.unbound.lock().clone();
        let single = [listener];
        for dispatcher in self.inner.collection.dispatchers() {
            if staged.iter().any(|d| Arc::ptr_eq(d, &dispatcher)) {
                continue;
            }
            notify(&self.inner.name, &single, Transition::Bind, &dispatcher);
        }
    }

    // 调用方必须持有 transitions 锁
    fn track(&self, handle: Handle) {
        let inner = &self.inner;
        if let Some(existing) = inner.collection.find_dispatcher(&handle) {
            // 已跟踪：仅当它仍在暂存区且监听器已就绪时补发 bind，真正的重复事件直接忽略
            let listeners = {
                let l = inner.listeners.lock();
                if !l.attached {
                    return;
                }
                l.set.snapshot()
            };
            let staged = {
                let mut unbound = inner.unbound.lock();
                match unbound.iter().position(|d| Arc::ptr_eq(d, &existing)) {
                    Some(pos) => {
                        unbound.remove(pos);
                        true
                    }
                    None => false,
                }
            };
            if staged {
                notify(&inner.name, &listeners, Transition::Bind, &existing);
            }
            return;
        }
        if let Err(e) = inner.catalog.admit(&handle) {
            let err = LivebindError::ProviderResolution {
                service: handle.id(),
                reason: format!("{e:#}"),
            };
            tracing::info!(tracker = %inner.name, error = %err, "error tracking new service reference");
            return;
        }
        let dispatcher = Arc::new(Dispatcher::new(
            handle,
            inner.catalog.clone(),
            inner.collection.kind_cell(),
        ));
        if !inner.collection.insert_dispatcher(dispatcher.clone()) {
            return;
        }
        tracing::debug!(tracker = %inner.name, service = dispatcher.handle().id(), "service tracked");
        let listeners = {
            let l = inner.listeners.lock();
            l.attached.then(|| l.set.snapshot())
        };
        match listeners {
            Some(listeners) => notify(&inner.name, &listeners, Transition::Bind, &dispatcher),
            None => inner.unbound.lock().push(dispatcher),
        }
    }

    // 调用方必须持有 transitions 锁
    fn untrack(&self, handle: &Handle) {
        let inner = &self.inner;
        let Some(dispatcher) = inner.collection.find_dispatcher(handle) else {
            return;
        };
        let was_staged = {
            let mut unbound = inner.unbound.lock();
            let before = unbound.len();
            unbound.retain(|d| !Arc::ptr_eq(d, &dispatcher));
            unbound.len() != before
        };
        // 从未 bind 过的成员不发 unbind；unbind 先于移除和销毁，回调里仍可访问成员
        if !was_staged {
            let listeners = inner.listeners.lock().set.snapshot();
            notify(&inner.name, &listeners, Transition::Unbind, &dispatcher);
        }
        inner.collection.remove_dispatcher(&dispatcher);
        dispatcher.destroy();
        tracing::debug!(tracker = %inner.name, service = handle.id(), "service untracked");
    }

    fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == TrackerState::Stopped {
                return;
            }
            *state = TrackerState::Stopped;
        }
        for dispatcher in self.inner.collection.dispatchers() {
            self.untrack(dispatcher.handle());
        }
        self.inner.unbound.lock().clear();
        if let Some(registry) = &self.inner.registry {
            registry.unregister(self.inner.id);
        }
        self.inner.stop.trigger();
        tracing::debug!(tracker = %self.inner.name, "tracker stopped");
    }

    /// Feed `source` into this tracker on a tokio task until the source closes
    /// or the tracker stops. Listener callbacks then run on that task.
    pub fn spawn_pump<E: EventSource + 'static>(&self, mut source: E) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tracker.inner.stop.wait() => break,
                    event = source.next_event() => match event {
                        Some(event) => tracker.handle_event(event),
                        None => break,
                    },
                }
            }
            tracing::debug!(tracker = %tracker.inner.name, "event pump finished");
        })
    }

    /// Pump fed through a bounded channel of [`event_capacity`](Self::event_capacity)
    /// slots. Senders wait while the channel is full.
    pub fn spawn_channel_pump(&self) -> (mpsc::Sender<CatalogEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.inner.event_capacity);
        (tx, self.spawn_pump(rx))
    }
}

impl<S: ?Sized> fmt::Debug for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// Object-safe lifecycle so a container can hold trackers of different service types.
pub trait ManagedLifecycle: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> Result<()>;
    fn activate(&self) -> Result<()>;
    fn stop(&self);
}

impl<S: ?Sized + Send + Sync + 'static> ManagedLifecycle for Tracker<S> {
    fn name(&self) -> &str {
        Tracker::name(self)
    }
    fn start(&self) -> Result<()> {
        Tracker::start(self)
    }
    fn activate(&self) -> Result<()> {
        Tracker::activate(self)
    }
    fn stop(&self) {
        Tracker::stop(self)
    }
}
