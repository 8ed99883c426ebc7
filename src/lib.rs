pub mod catalog;
pub mod collection;
pub mod config;
pub mod container;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod managed;
pub mod ordering;
pub mod registry;
pub mod tracker;

// 允许在本 crate 内通过 `mmg_livebind::...` 自引用（供 proc-macro 展开使用）
extern crate self as mmg_livebind;

#[doc(hidden)]
pub use inventory as __inventory;

pub mod prelude {
    pub use crate::catalog::{Catalog, CatalogEvent, EventSource, Filter, Handle, Properties};
    pub use crate::config::{CollectionShape, OrderingBasis, TrackerConfig};
    pub use crate::container::Container;
    pub use crate::dispatcher::{Member, MemberKind, Proxy};
    pub use crate::error::{LivebindError, Result};
    pub use crate::listener::{listener, BindListener};
    pub use crate::managed::{ManagedCollection, ManagedList, ManagedSet};
    pub use crate::ordering::OrderingPolicy;
    pub use crate::tracker::{Tracker, TrackerState};
}

pub use livebind_macros::*;
