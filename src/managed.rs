//! Read-only consumer views over the tracked dispatchers.
//!
//! Membership is derived from the catalog, so every structural mutator fails
//! with [`LivebindError::UnsupportedOperation`] and leaves the contents alone.
use std::{fmt, iter::FusedIterator, ops::Deref, sync::Arc};

use crate::{
    catalog::Handle,
    collection::{DynamicCollection, Iter},
    config::CollectionShape,
    dispatcher::{Dispatcher, KindCell, Member, MemberKind, Proxy},
    error::{LivebindError, Result},
    ordering::OrderingPolicy,
};

pub struct ManagedCollection<S: ?Sized> {
    shape: CollectionShape,
    dispatchers: Arc<DynamicCollection<Arc<Dispatcher<S>>>>,
    kind: Arc<KindCell>,
}

impl<S: ?Sized + Send + Sync + 'static> ManagedCollection<S> {
    pub(crate) fn new(shape: CollectionShape, kind: MemberKind, ordering: &OrderingPolicy<S>) -> Self {
        tracing::debug!(?shape, member_kind = ?kind, ordering = ?ordering, "managed collection created");
        Self {
            shape,
            // list 允许重复，set 按 member 去重
            dispatchers: Arc::new(DynamicCollection::with_sorter(
                shape == CollectionShape::List,
                ordering.dispatcher_sorter(),
            )),
            kind: Arc::new(KindCell::new(kind)),
        }
    }

    pub fn shape(&self) -> CollectionShape {
        self.shape
    }

    /// Current member kind; does not decide it.
    pub fn member_kind(&self) -> MemberKind {
        self.kind.get()
    }

    pub(crate) fn kind_cell(&self) -> Arc<KindCell> {
        self.kind.clone()
    }

    /// Bind a consumer expecting `requested` members.
    ///
    /// The first typed request fixes the member kind; an untyped request
    /// (`MemberKind::Undecided`) accepts whatever is fixed and settles an
    /// undecided collection on instances. A request for the other kind fails
    /// with `ConfigurationConflict` and leaves the existing shape usable.
    pub fn bind(&self, requested: MemberKind) -> Result<()> {
        let current = match requested {
            MemberKind::Undecided => self.kind.effective(),
            kind => self.kind.decide(kind),
        };
        if requested == MemberKind::Undecided || current == requested {
            return Ok(());
        }
        Err(LivebindError::ConfigurationConflict(format!(
            "the same collection cannot be bound as {requested:?} while it already exposes {current:?}"
        )))
    }

    /// Bind as handles and iterate them.
    pub fn handles(&self) -> Result<impl Iterator<Item = Handle>> {
        self.bind(MemberKind::Handles)?;
        Ok(self.dispatchers.iter().map(|d| d.handle().clone()))
    }

    /// Bind as resolved instances and iterate their proxies.
    pub fn instances(&self) -> Result<impl Iterator<Item = Proxy<S>>> {
        self.bind(MemberKind::Instances)?;
        Ok(self.dispatchers.iter().map(|d| d.proxy()))
    }

    pub fn as_list(&self) -> Result<ManagedList<S>> {
        match self.shape {
            CollectionShape::List => Ok(ManagedList(self.clone())),
            CollectionShape::Set => Err(LivebindError::ConfigurationConflict(
                "a set-shaped collection cannot be converted to a list".into(),
            )),
        }
    }

    pub fn as_set(&self) -> Result<ManagedSet<S>> {
        match self.shape {
            CollectionShape::Set => Ok(ManagedSet(self.clone())),
            CollectionShape::List => Err(LivebindError::ConfigurationConflict(
                "a list-shaped collection cannot be converted to a set".into(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    pub fn iter(&self) -> Members<S> {
        Members {
            inner: self.dispatchers.iter(),
        }
    }

    pub fn contains(&self, member: &Member<S>) -> bool {
        self.iter().any(|m| &m == member)
    }

    pub fn add(&self, _member: Member<S>) -> Result<bool> {
        Err(LivebindError::UnsupportedOperation("add"))
    }

    pub fn remove(&self, _member: &Member<S>) -> Result<bool> {
        Err(LivebindError::UnsupportedOperation("remove"))
    }

    pub fn extend(&self, _members: impl IntoIterator<Item = Member<S>>) -> Result<()> {
        Err(LivebindError::UnsupportedOperation("extend"))
    }

    pub fn retain(&self, _keep: impl FnMut(&Member<S>) -> bool) -> Result<()> {
        Err(LivebindError::UnsupportedOperation("retain"))
    }

    pub fn clear(&self) -> Result<()> {
        Err(LivebindError::UnsupportedOperation("clear"))
    }

    // 以下仅供 Tracker 使用：成员关系只由目录事件驱动

    pub(crate) fn insert_dispatcher(&self, dispatcher: Arc<Dispatcher<S>>) -> bool {
        self.dispatchers.add(dispatcher)
    }

    pub(crate) fn remove_dispatcher(&self, dispatcher: &Arc<Dispatcher<S>>) -> bool {
        self.dispatchers.remove(dispatcher)
    }

    pub(crate) fn find_dispatcher(&self, handle: &Handle) -> Option<Arc<Dispatcher<S>>> {
        self.dispatchers.find(|d| d.handle() == handle)
    }

    pub(crate) fn dispatchers(&self) -> Vec<Arc<Dispatcher<S>>> {
        self.dispatchers.iter().collect()
    }
}

impl<S: ?Sized> Clone for ManagedCollection<S> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape,
            dispatchers: self.dispatchers.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl<S: ?Sized> fmt::Debug for ManagedCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCollection")
            .field("shape", &self.shape)
            .field("member_kind", &self.kind.get())
            .field("dispatchers", &self.dispatchers)
            .finish()
    }
}

impl<'a, S: ?Sized + Send + Sync + 'static> IntoIterator for &'a ManagedCollection<S> {
    type Item = Member<S>;
    type IntoIter = Members<S>;

    fn into_iter(self) -> Members<S> {
        self.iter()
    }
}

/// Snapshot iterator yielding members; reading a member settles an undecided
/// collection on instances.
pub struct Members<S: ?Sized> {
    inner: Iter<Arc<Dispatcher<S>>>,
}

impl<S: ?Sized> Members<S> {
    pub fn next_index(&self) -> usize {
        self.inner.next_index()
    }
}

impl<S: ?Sized + Send + Sync + 'static> Iterator for Members<S> {
    type Item = Member<S>;

    fn next(&mut self) -> Option<Member<S>> {
        self.inner.next().map(|d| d.member())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S: ?Sized + Send + Sync + 'static> DoubleEndedIterator for Members<S> {
    fn next_back(&mut self) -> Option<Member<S>> {
        self.inner.next_back().map(|d| d.member())
    }
}

impl<S: ?Sized + Send + Sync + 'static> ExactSizeIterator for Members<S> {}
impl<S: ?Sized + Send + Sync + 'static> FusedIterator for Members<S> {}

/// Indexed view; only available on list-shaped collections.
pub struct ManagedList<S: ?Sized>(ManagedCollection<S>);

impl<S: ?Sized + Send + Sync + 'static> ManagedList<S> {
    pub fn get(&self, index: usize) -> Result<Member<S>> {
        self.0
            .dispatchers
            .get(index)
            .map(|d| d.member())
            .ok_or_else(|| LivebindError::IndexOutOfBounds {
                index,
                len: self.0.len(),
            })
    }

    pub fn index_of(&self, member: &Member<S>) -> Option<usize> {
        self.0.iter().position(|m| &m == member)
    }

    pub fn last_index_of(&self, member: &Member<S>) -> Option<usize> {
        self.0.iter().rposition(|m| &m == member)
    }

    /// Iterate from `index`; `index == len()` yields an empty iterator.
    pub fn iter_from(&self, index: usize) -> Result<Members<S>> {
        let inner = self.0.dispatchers.iter_from(index);
        let len = inner.next_index() + inner.len();
        if index > len {
            return Err(LivebindError::IndexOutOfBounds { index, len });
        }
        Ok(Members { inner })
    }

    pub fn set(&self, _index: usize, _member: Member<S>) -> Result<Member<S>> {
        Err(LivebindError::UnsupportedOperation("set"))
    }

    pub fn insert(&self, _index: usize, _member: Member<S>) -> Result<()> {
        Err(LivebindError::UnsupportedOperation("insert"))
    }

    pub fn remove_at(&self, _index: usize) -> Result<Member<S>> {
        Err(LivebindError::UnsupportedOperation("remove_at"))
    }

    pub fn sub_list(&self, _from: usize, _to: usize) -> Result<ManagedList<S>> {
        Err(LivebindError::UnsupportedOperation("sub_list"))
    }
}

impl<S: ?Sized> Deref for ManagedList<S> {
    type Target = ManagedCollection<S>;

    fn deref(&self) -> &ManagedCollection<S> {
        &self.0
    }
}

impl<S: ?Sized> Clone for ManagedList<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// De-duplicated view over a set-shaped collection.
pub struct ManagedSet<S: ?Sized>(ManagedCollection<S>);

impl<S: ?Sized> Deref for ManagedSet<S> {
    type Target = ManagedCollection<S>;

    fn deref(&self) -> &ManagedCollection<S> {
        &self.0
    }
}

impl<S: ?Sized> Clone for ManagedSet<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
