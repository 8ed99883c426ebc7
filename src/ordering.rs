//! Member ordering: on raw handles or on resolved instances, natural or injected.
use std::{cmp, fmt, sync::Arc};

use crate::{
    catalog::Handle,
    collection::{stable_sort, Sorter},
    config::{OrderingBasis, TrackerConfig},
    dispatcher::Dispatcher,
    error::{LivebindError, Result},
};

pub type HandleCompareFn = fn(&Handle, &Handle) -> cmp::Ordering;

/// A handle comparator registered at link time, addressable by name from
/// [`TrackerConfig::comparator`]. Usually emitted by `#[mmg_livebind::ordering]`.
pub struct OrderingRegistration {
    pub name: &'static str,
    pub compare: HandleCompareFn,
}

inventory::collect!(OrderingRegistration);

fn natural(a: &Handle, b: &Handle) -> cmp::Ordering {
    a.cmp(b)
}

fn service_id(a: &Handle, b: &Handle) -> cmp::Ordering {
    a.id().cmp(&b.id())
}

inventory::submit! { OrderingRegistration { name: "natural", compare: natural } }
inventory::submit! { OrderingRegistration { name: "service-id", compare: service_id } }

/// Find a registered comparator by name.
pub fn registered(name: &str) -> Option<HandleCompareFn> {
    inventory::iter::<OrderingRegistration>
        .into_iter()
        .find(|reg| reg.name == name)
        .map(|reg| reg.compare)
}

/// Names of every registered comparator
pub fn registered_names() -> Vec<&'static str> {
    inventory::iter::<OrderingRegistration>
        .into_iter()
        .map(|reg| reg.name)
        .collect()
}

pub enum OrderingPolicy<S: ?Sized> {
    Unordered,
    Handles(Arc<dyn Fn(&Handle, &Handle) -> cmp::Ordering + Send + Sync>),
    Instances(Arc<dyn Fn(&S, &S) -> cmp::Ordering + Send + Sync>),
}

impl<S: ?Sized + Send + Sync + 'static> OrderingPolicy<S> {
    pub fn natural_handles() -> Self {
        OrderingPolicy::Handles(Arc::new(natural))
    }

    pub fn natural_instances() -> Self
    where
        S: Ord,
    {
        Self::by_instance(|a: &S, b: &S| a.cmp(b))
    }

    pub fn by_handle(f: impl Fn(&Handle, &Handle) -> cmp::Ordering + Send + Sync + 'static) -> Self {
        OrderingPolicy::Handles(Arc::new(f))
    }

    pub fn by_instance(f: impl Fn(&S, &S) -> cmp::Ordering + Send + Sync + 'static) -> Self {
        OrderingPolicy::Instances(Arc::new(f))
    }

    pub fn named(name: &str) -> Result<Self> {
        registered(name)
            .map(|f| OrderingPolicy::Handles(Arc::new(f)))
            .ok_or_else(|| LivebindError::UnknownOrdering(name.to_string()))
    }

    /// Explicit comparator first, then natural ordering on the configured basis.
    ///
    /// Instance ordering needs `S: Ord` (or a closure), so it has to be passed
    /// in code with [`OrderingPolicy::natural_instances`] or
    /// [`OrderingPolicy::by_instance`].
    pub fn from_config(cfg: &TrackerConfig) -> Result<Self> {
        match (&cfg.comparator, cfg.ordering_basis) {
            (_, Some(OrderingBasis::Instances)) => {
                Err(LivebindError::ConfigurationConflict(
                    "instance ordering must be supplied as an OrderingPolicy, not by name".into(),
                ))
            }
            (Some(name), _) => Self::named(name),
            (None, Some(OrderingBasis::Handles)) => Ok(Self::natural_handles()),
            (None, None) => Ok(OrderingPolicy::Unordered),
        }
    }

    pub fn basis(&self) -> Option<OrderingBasis> {
        match self {
            OrderingPolicy::Unordered => None,
            OrderingPolicy::Handles(_) => Some(OrderingBasis::Handles),
            OrderingPolicy::Instances(_) => Some(OrderingBasis::Instances),
        }
    }

    /// Lift the policy onto dispatchers.
    ///
    /// Instance ordering resolves every member once per sort, before any
    /// comparison, so the order stays total even if a provider comes or goes
    /// mid-sort. Members that cannot be resolved sort after every resolvable
    /// one and keep their relative order.
    pub(crate) fn dispatcher_sorter(&self) -> Option<Sorter<Arc<Dispatcher<S>>>> {
        match self {
            OrderingPolicy::Unordered => None,
            OrderingPolicy::Handles(compare) => {
                let compare = compare.clone();
                Some(stable_sort::<Arc<Dispatcher<S>>>(Arc::new(
                    move |a: &Arc<Dispatcher<S>>, b: &Arc<Dispatcher<S>>| compare(a.handle(), b.handle()),
                )))
            }
            OrderingPolicy::Instances(compare) => {
                let compare = compare.clone();
                Some(Arc::new(move |items: &mut [Arc<Dispatcher<S>>]| {
                    let mut keyed: Vec<(Option<Arc<S>>, Arc<Dispatcher<S>>)> =
                        items.iter().map(|d| (d.resolve().ok(), d.clone())).collect();
                    keyed.sort_by(|(x, _), (y, _)| match (x, y) {
                        (Some(x), Some(y)) => compare(&**x, &**y),
                        (Some(_), None) => cmp::Ordering::Less,
                        (None, Some(_)) => cmp::Ordering::Greater,
                        (None, None) => cmp::Ordering::Equal,
                    });
                    for (slot, (_, d)) in items.iter_mut().zip(keyed) {
                        *slot = d;
                    }
                }))
            }
        }
    }
}

impl<S: ?Sized> Clone for OrderingPolicy<S> {
    fn clone(&self) -> Self {
        match self {
            OrderingPolicy::Unordered => OrderingPolicy::Unordered,
            OrderingPolicy::Handles(c) => OrderingPolicy::Handles(c.clone()),
            OrderingPolicy::Instances(c) => OrderingPolicy::Instances(c.clone()),
        }
    }
}

impl<S: ?Sized> fmt::Debug for OrderingPolicy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingPolicy::Unordered => write!(f, "Unordered"),
            OrderingPolicy::Handles(_) => write!(f, "Handles(..)"),
            OrderingPolicy::Instances(_) => write!(f, "Instances(..)"),
        }
    }
}
