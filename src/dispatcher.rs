//! Per-handle lazy resolution and the forwarding proxy built on it.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use crate::{
    catalog::{Catalog, Handle},
    error::{LivebindError, Result},
};

/// What a managed collection hands out to consumers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    #[default]
    Undecided,
    Handles,
    Instances,
}

impl MemberKind {
    fn to_bits(self) -> u8 {
        match self {
            MemberKind::Undecided => 0,
            MemberKind::Handles => 1,
            MemberKind::Instances => 2,
        }
    }
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => MemberKind::Handles,
            2 => MemberKind::Instances,
            _ => MemberKind::Undecided,
        }
    }
}

/// Member kind shared by a collection and all of its dispatchers.
///
/// Leaves `Undecided` exactly once, through a compare-and-set.
pub(crate) struct KindCell(AtomicU8);

impl KindCell {
    pub(crate) fn new(kind: MemberKind) -> Self {
        Self(AtomicU8::new(kind.to_bits()))
    }
    pub(crate) fn get(&self) -> MemberKind {
        MemberKind::from_bits(self.0.load(Ordering::Acquire))
    }
    /// Try to move from `Undecided` to `kind`; returns the kind in effect afterwards.
    pub(crate) fn decide(&self, kind: MemberKind) -> MemberKind {
        if kind == MemberKind::Undecided {
            return self.get();
        }
        match self.0.compare_exchange(
            MemberKind::Undecided.to_bits(),
            kind.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                tracing::debug!(member_kind = ?kind, "member kind decided");
                kind
            }
            Err(current) => MemberKind::from_bits(current),
        }
    }
    /// Kind used when a member is read; an undecided collection settles on instances.
    pub(crate) fn effective(&self) -> MemberKind {
        self.decide(MemberKind::Instances)
    }
}

enum Slot<S: ?Sized> {
    Pending,
    Resolved(Arc<S>),
    Destroyed,
}

/// Binds one catalog handle to its lazily resolved instance.
pub struct Dispatcher<S: ?Sized> {
    handle: Handle,
    catalog: Arc<dyn Catalog<S>>,
    kind: Arc<KindCell>,
    slot: Mutex<Slot<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Dispatcher<S> {
    pub(crate) fn new(handle: Handle, catalog: Arc<dyn Catalog<S>>, kind: Arc<KindCell>) -> Self {
        Self {
            handle,
            catalog,
            kind,
            slot: Mutex::new(Slot::Pending),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The instance behind the handle, fetched from the catalog on first success
    /// and cached until [`destroy`](Self::destroy).
    pub fn resolve(&self) -> Result<Arc<S>> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Destroyed => Err(LivebindError::Unavailable),
            Slot::Resolved(instance) => Ok(instance.clone()),
            Slot::Pending => match self.catalog.resolve_instance(&self.handle) {
                Ok(Some(instance)) => {
                    *slot = Slot::Resolved(instance.clone());
                    Ok(instance)
                }
                Ok(None) => Err(LivebindError::Unavailable),
                Err(e) => Err(LivebindError::ProviderResolution {
                    service: self.handle.id(),
                    reason: format!("{e:#}"),
                }),
            },
        }
    }

    /// Release the cached instance and invalidate every proxy. Idempotent; returns
    /// whether this call did the teardown.
    pub fn destroy(&self) -> bool {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Destroyed) {
            Slot::Destroyed => false,
            Slot::Pending => true,
            Slot::Resolved(_) => {
                if let Err(e) = self.catalog.release(&self.handle) {
                    tracing::warn!(service = self.handle.id(), error = %e, "failed to release service");
                }
                true
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Destroyed)
    }

    pub fn proxy(self: &Arc<Self>) -> Proxy<S> {
        Proxy {
            dispatcher: self.clone(),
        }
    }

    /// The value exposed through iteration: the raw handle or the proxy.
    pub fn member(self: &Arc<Self>) -> Member<S> {
        match self.kind.effective() {
            MemberKind::Handles => Member::Handle(self.handle.clone()),
            _ => Member::Instance(self.proxy()),
        }
    }
}

// 每个 handle 只对应一个 dispatcher，因此按 handle 比较与按 member 比较等价，
// 且不会在内部去重时提前锁定 member kind
impl<S: ?Sized> PartialEq for Dispatcher<S> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}
impl<S: ?Sized> Eq for Dispatcher<S> {}

impl<S: ?Sized> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("service", &self.handle.id())
            .finish()
    }
}

/// Stable handle that forwards to whatever instance its dispatcher resolves.
///
/// Once the provider departs every call fails with [`LivebindError::Unavailable`].
pub struct Proxy<S: ?Sized> {
    dispatcher: Arc<Dispatcher<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Proxy<S> {
    pub fn get(&self) -> Result<Arc<S>> {
        self.dispatcher.resolve()
    }

    /// Forward one call to the current instance.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R> {
        let instance = self.dispatcher.resolve()?;
        Ok(f(&instance))
    }

    pub fn handle(&self) -> &Handle {
        self.dispatcher.handle()
    }

    pub fn is_available(&self) -> bool {
        !self.dispatcher.is_destroyed()
    }
}

impl<S: ?Sized> Clone for Proxy<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}
impl<S: ?Sized> PartialEq for Proxy<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.dispatcher, &other.dispatcher)
    }
}
impl<S: ?Sized> Eq for Proxy<S> {}
impl<S: ?Sized> Hash for Proxy<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.dispatcher), state);
    }
}
impl<S: ?Sized> fmt::Debug for Proxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("service", &self.dispatcher.handle.id())
            .finish()
    }
}

/// One element of a managed collection.
pub enum Member<S: ?Sized> {
    Handle(Handle),
    Instance(Proxy<S>),
}

impl<S: ?Sized + Send + Sync + 'static> Member<S> {
    pub fn handle(&self) -> &Handle {
        match self {
            Member::Handle(h) => h,
            Member::Instance(p) => p.handle(),
        }
    }
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Member::Handle(h) => Some(h),
            Member::Instance(_) => None,
        }
    }
    pub fn as_proxy(&self) -> Option<&Proxy<S>> {
        match self {
            Member::Handle(_) => None,
            Member::Instance(p) => Some(p),
        }
    }
}

impl<S: ?Sized> Clone for Member<S> {
    fn clone(&self) -> Self {
        match self {
            Member::Handle(h) => Member::Handle(h.clone()),
            Member::Instance(p) => Member::Instance(p.clone()),
        }
    }
}
impl<S: ?Sized> PartialEq for Member<S> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Member::Handle(a), Member::Handle(b)) => a == b,
            (Member::Instance(a), Member::Instance(b)) => a == b,
            _ => false,
        }
    }
}
impl<S: ?Sized> Eq for Member<S> {}
impl<S: ?Sized> fmt::Debug for Member<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Handle(h) => f.debug_tuple("Handle").field(h).finish(),
            Member::Instance(p) => f.debug_tuple("Instance").field(p).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Filter, Properties};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        resolves: AtomicUsize,
        releases: AtomicUsize,
        gone: std::sync::atomic::AtomicBool,
    }

    impl Catalog<str> for Counting {
        fn lookup(&self, _filter: &Filter) -> Vec<Handle> {
            Vec::new()
        }
        fn resolve_instance(&self, handle: &Handle) -> anyhow::Result<Option<Arc<str>>> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if self.gone.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(Arc::from(format!("svc-{}", handle.id()))))
        }
        fn release(&self, _handle: &Handle) -> anyhow::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher(catalog: &Arc<Counting>, kind: MemberKind) -> Arc<Dispatcher<str>> {
        let cat: Arc<dyn Catalog<str>> = catalog.clone();
        Arc::new(Dispatcher::new(
            Handle::new(9, Properties::new()),
            cat,
            Arc::new(KindCell::new(kind)),
        ))
    }

    #[test]
    fn resolve_is_lazy_and_cached() {
        let catalog = Arc::new(Counting::default());
        let d = dispatcher(&catalog, MemberKind::Instances);
        assert_eq!(catalog.resolves.load(Ordering::SeqCst), 0);
        assert_eq!(&*d.resolve().unwrap(), "svc-9");
        assert_eq!(&*d.resolve().unwrap(), "svc-9");
        assert_eq!(catalog.resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_resolve_contacts_catalog_once() {
        let catalog = Arc::new(Counting::default());
        let d = dispatcher(&catalog, MemberKind::Instances);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || d.resolve().map(|s| s.len()))
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap().is_ok());
        }
        assert_eq!(catalog.resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_releases_once_and_invalidates_proxy() {
        let catalog = Arc::new(Counting::default());
        let d = dispatcher(&catalog, MemberKind::Instances);
        let proxy = d.proxy();
        assert_eq!(proxy.with(|s| s.len()).unwrap(), 5);
        assert!(d.destroy());
        assert!(!d.destroy());
        assert_eq!(catalog.releases.load(Ordering::SeqCst), 1);
        assert!(!proxy.is_available());
        assert!(matches!(proxy.get(), Err(LivebindError::Unavailable)));
    }

    #[test]
    fn destroy_without_resolution_releases_nothing() {
        let catalog = Arc::new(Counting::default());
        let d = dispatcher(&catalog, MemberKind::Instances);
        assert!(d.destroy());
        assert_eq!(catalog.releases.load(Ordering::SeqCst), 0);
        assert!(matches!(d.resolve(), Err(LivebindError::Unavailable)));
        assert_eq!(catalog.resolves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn vanished_provider_is_unavailable() {
        let catalog = Arc::new(Counting::default());
        catalog.gone.store(true, Ordering::SeqCst);
        let d = dispatcher(&catalog, MemberKind::Instances);
        assert!(matches!(d.resolve(), Err(LivebindError::Unavailable)));
    }

    #[test]
    fn member_follows_kind() {
        let catalog = Arc::new(Counting::default());
        let d = dispatcher(&catalog, MemberKind::Handles);
        assert_eq!(d.member().as_handle().map(|h| h.id()), Some(9));

        let undecided = dispatcher(&catalog, MemberKind::Undecided);
        assert!(undecided.member().as_proxy().is_some());
        assert_eq!(undecided.kind.get(), MemberKind::Instances);
    }

    #[test]
    fn kind_cell_decides_once() {
        let cell = KindCell::new(MemberKind::Undecided);
        assert_eq!(cell.decide(MemberKind::Undecided), MemberKind::Undecided);
        assert_eq!(cell.decide(MemberKind::Handles), MemberKind::Handles);
        assert_eq!(cell.decide(MemberKind::Instances), MemberKind::Handles);
        assert_eq!(cell.effective(), MemberKind::Handles);
    }
}
