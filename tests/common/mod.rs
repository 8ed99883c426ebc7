//! In-memory catalog used as a test double; the crate itself ships no catalog.
#![allow(dead_code)]

use mmg_livebind::listener::DynListener;
use mmg_livebind::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

pub struct Named(pub &'static str);

impl Greeter for Named {
    fn greet(&self) -> String {
        format!("hello from {}", self.0)
    }
}

pub fn greeter(name: &'static str) -> Arc<dyn Greeter> {
    Arc::new(Named(name))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn props(value: serde_json::Value) -> Properties {
    serde_json::from_value(value).expect("properties must be a JSON object")
}

pub struct TestCatalog<S: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(Handle, Arc<S>)>>,
    rejected: Mutex<HashSet<u64>>,
    failing_release: Mutex<HashSet<u64>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CatalogEvent>>>,
    pub resolves: AtomicUsize,
    pub releases: AtomicUsize,
}

impl<S: ?Sized + Send + Sync + 'static> TestCatalog<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            failing_release: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(Vec::new()),
            resolves: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn as_catalog(self: &Arc<Self>) -> Arc<dyn Catalog<S>> {
        self.clone()
    }

    /// Raw event stream, as the catalog would deliver it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CatalogEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: CatalogEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Register without emitting an event (visible to lookup only).
    pub fn register_silently(&self, properties: serde_json::Value, instance: Arc<S>) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Handle::new(id, props(properties));
        self.entries.lock().push((handle.clone(), instance));
        handle
    }

    pub fn register(&self, properties: serde_json::Value, instance: Arc<S>) -> Handle {
        let handle = self.register_silently(properties, instance);
        self.publish(CatalogEvent::Arrival(handle.clone()));
        handle
    }

    /// Remove without emitting an event.
    pub fn unregister_silently(&self, handle: &Handle) {
        self.entries.lock().retain(|(h, _)| h != handle);
    }

    pub fn unregister(&self, handle: &Handle) {
        self.unregister_silently(handle);
        self.publish(CatalogEvent::Departure(handle.clone()));
    }

    pub fn reject(&self, id: u64) {
        self.rejected.lock().insert(id);
    }

    pub fn fail_release(&self, id: u64) {
        self.failing_release.lock().insert(id);
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl<S: ?Sized + Send + Sync + 'static> Catalog<S> for TestCatalog<S> {
    fn lookup(&self, filter: &Filter) -> Vec<Handle> {
        self.entries
            .lock()
            .iter()
            .filter(|(h, _)| filter.matches(h))
            .map(|(h, _)| h.clone())
            .collect()
    }

    fn resolve_instance(&self, handle: &Handle) -> anyhow::Result<Option<Arc<S>>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .lock()
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, s)| s.clone()))
    }

    fn release(&self, handle: &Handle) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.failing_release.lock().contains(&handle.id()) {
            anyhow::bail!("release of service {} failed", handle.id());
        }
        Ok(())
    }

    fn admit(&self, handle: &Handle) -> anyhow::Result<()> {
        if self.rejected.lock().contains(&handle.id()) {
            anyhow::bail!("interfaces of service {} cannot be proxied", handle.id());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seen {
    Bind(u64),
    Unbind(u64),
}

pub type Journal = Arc<Mutex<Vec<Seen>>>;

/// Listener that appends every notification to a shared journal.
pub fn recorder<S: ?Sized + Send + Sync + 'static>() -> (Journal, DynListener<S>) {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let on_bind = journal.clone();
    let on_unbind = journal.clone();
    let l = listener(
        move |h: &Handle, _p: &Proxy<S>| on_bind.lock().push(Seen::Bind(h.id())),
        move |h: &Handle, _p: &Proxy<S>| on_unbind.lock().push(Seen::Unbind(h.id())),
    );
    (journal, l)
}

pub fn ids<I: IntoIterator<Item = Handle>>(handles: I) -> Vec<u64> {
    handles.into_iter().map(|h| h.id()).collect()
}

/// Handle ids in iteration order. Reading members settles an undecided kind on instances.
pub fn member_ids<S: ?Sized + Send + Sync + 'static>(c: &ManagedCollection<S>) -> Vec<u64> {
    c.iter().map(|m| m.handle().id()).collect()
}
