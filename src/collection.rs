//! Lock-guarded backing store that stays safe to traverse while it changes.
//!
//! Consistency policy: every iterator works on a snapshot taken when it is
//! created. Writers copy the vector on write (`Arc::make_mut`) only while a
//! snapshot is still alive, so traversal never observes a half-applied mutation
//! and never skips or repeats an element. Indexed reads take the lock just long
//! enough to clone the element.
use parking_lot::RwLock;
use std::{cmp, fmt, iter::FusedIterator, sync::Arc};

pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> cmp::Ordering + Send + Sync>;

/// Re-orders the whole store in place. Must be stable.
pub type Sorter<T> = Arc<dyn Fn(&mut [T]) + Send + Sync>;

/// Stable sort driven by a plain comparator.
pub fn stable_sort<T: 'static>(comparator: Comparator<T>) -> Sorter<T> {
    Arc::new(move |items: &mut [T]| items.sort_by(|a, b| comparator(a, b)))
}

pub struct DynamicCollection<T> {
    allow_duplicates: bool,
    sorter: Option<Sorter<T>>,
    storage: RwLock<Arc<Vec<T>>>,
}

impl<T: Clone + PartialEq + 'static> DynamicCollection<T> {
    pub fn new(allow_duplicates: bool, comparator: Option<Comparator<T>>) -> Self {
        Self::with_sorter(allow_duplicates, comparator.map(stable_sort))
    }

    /// Ordered by a sorter that sees the whole store, e.g. one that computes
    /// each element's sort key once.
    pub fn with_sorter(allow_duplicates: bool, sorter: Option<Sorter<T>>) -> Self {
        Self {
            allow_duplicates,
            sorter,
            storage: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.sorter.is_some()
    }

    /// Insert `item`; when ordered the store is re-sorted (stable, so equal
    /// items keep arrival order). Returns `false` if duplicates are refused and
    /// an equal item is already present.
    pub fn add(&self, item: T) -> bool {
        let mut guard = self.storage.write();
        if !self.allow_duplicates && guard.contains(&item) {
            return false;
        }
        let items = Arc::make_mut(&mut *guard);
        items.push(item);
        self.reorder(items);
        true
    }

    pub fn remove(&self, item: &T) -> bool {
        let mut guard = self.storage.write();
        let Some(pos) = guard.iter().position(|x| x == item) else {
            return false;
        };
        let items = Arc::make_mut(&mut *guard);
        items.remove(pos);
        self.reorder(items);
        true
    }

    fn reorder(&self, items: &mut [T]) {
        if let Some(sort) = &self.sorter {
            sort(items);
        }
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.storage.read().get(index).cloned()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.storage.read().contains(item)
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        self.storage.read().iter().find(|x| pred(x)).cloned()
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        self.storage.read().clone()
    }

    pub fn iter(&self) -> Iter<T> {
        Iter::new(self.snapshot(), 0)
    }

    /// Iterator starting at `start` (clamped to the length of the snapshot).
    pub fn iter_from(&self, start: usize) -> Iter<T> {
        Iter::new(self.snapshot(), start)
    }
}

impl<T> fmt::Debug for DynamicCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCollection")
            .field("allow_duplicates", &self.allow_duplicates)
            .field("ordered", &self.sorter.is_some())
            .field("len", &self.storage.read().len())
            .finish()
    }
}

/// Finite, non-restartable traversal over one snapshot.
pub struct Iter<T> {
    items: Arc<Vec<T>>,
    front: usize,
    back: usize,
}

impl<T> Iter<T> {
    fn new(items: Arc<Vec<T>>, start: usize) -> Self {
        let back = items.len();
        Self {
            front: start.min(back),
            back,
            items,
        }
    }

    /// Index of the element the next call to `next()` yields.
    pub fn next_index(&self) -> usize {
        self.front
    }
}

impl<T: Clone> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front >= self.back {
            return None;
        }
        let item = self.items[self.front].clone();
        self.front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<T: Clone> DoubleEndedIterator for Iter<T> {
    fn next_back(&mut self) -> Option<T> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.items[self.back].clone())
    }
}

impl<T: Clone> ExactSizeIterator for Iter<T> {}
impl<T: Clone> FusedIterator for Iter<T> {}
