//! Bind/unbind notifications.
use std::{fmt, marker::PhantomData, sync::Arc};

use smallvec::SmallVec;

use crate::{
    catalog::Handle,
    dispatcher::{Dispatcher, Proxy},
};

/// Receives one `bind` when a provider joins a tracked collection and one
/// `unbind` when it leaves. During `unbind` the proxy still resolves; it is
/// invalidated right after the last listener returns.
pub trait BindListener<S: ?Sized>: Send + Sync {
    fn bind(&self, handle: &Handle, service: &Proxy<S>) -> anyhow::Result<()>;
    fn unbind(&self, handle: &Handle, service: &Proxy<S>) -> anyhow::Result<()>;
}

pub type DynListener<S> = Arc<dyn BindListener<S>>;

/// Listener made of two closures.
pub struct FnListener<S: ?Sized, B, U> {
    on_bind: B,
    on_unbind: U,
    _service: PhantomData<fn(&S)>,
}

impl<S, B, U> BindListener<S> for FnListener<S, B, U>
where
    S: ?Sized + Send + Sync + 'static,
    B: Fn(&Handle, &Proxy<S>) + Send + Sync,
    U: Fn(&Handle, &Proxy<S>) + Send + Sync,
{
    fn bind(&self, handle: &Handle, service: &Proxy<S>) -> anyhow::Result<()> {
        (self.on_bind)(handle, service);
        Ok(())
    }
    fn unbind(&self, handle: &Handle, service: &Proxy<S>) -> anyhow::Result<()> {
        (self.on_unbind)(handle, service);
        Ok(())
    }
}

pub fn listener<S, B, U>(on_bind: B, on_unbind: U) -> DynListener<S>
where
    S: ?Sized + Send + Sync + 'static,
    B: Fn(&Handle, &Proxy<S>) + Send + Sync + 'static,
    U: Fn(&Handle, &Proxy<S>) + Send + Sync + 'static,
{
    Arc::new(FnListener {
        on_bind,
        on_unbind,
        _service: PhantomData,
    })
}

/// Listeners of one tracker, in registration order.
pub(crate) struct ListenerSet<S: ?Sized> {
    entries: SmallVec<[DynListener<S>; 4]>,
}

impl<S: ?Sized + Send + Sync + 'static> ListenerSet<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    pub(crate) fn push(&mut self, listener: DynListener<S>) {
        self.entries.push(listener);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn snapshot(&self) -> SmallVec<[DynListener<S>; 4]> {
        self.entries.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Bind,
    Unbind,
}

/// Deliver one transition to `listeners` in order. A failing listener is
/// logged and does not stop delivery to the next one.
pub(crate) fn notify<S: ?Sized + Send + Sync + 'static>(
    tracker: &str,
    listeners: &[DynListener<S>],
    transition: Transition,
    dispatcher: &Arc<Dispatcher<S>>,
) {
    let proxy = dispatcher.proxy();
    let handle = dispatcher.handle();
    for l in listeners {
        let res = match transition {
            Transition::Bind => l.bind(handle, &proxy),
            Transition::Unbind => l.unbind(handle, &proxy),
        };
        if let Err(e) = res {
            tracing::warn!(tracker = %tracker, service = handle.id(), ?transition, error = %e, "listener callback failed");
        }
    }
}

impl<S: ?Sized> fmt::Debug for ListenerSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerSet({})", self.entries.len())
    }
}
