//! Boundary with the external provider catalog.
//!
//! The catalog owns providers and their handles; this crate only looks them up,
//! resolves instances through them and listens to their arrival/departure events.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tokio::sync::mpsc;

pub type Properties = BTreeMap<String, serde_json::Value>;

/// Integer property used by the natural handle order.
pub const SERVICE_RANKING: &str = "service.ranking";
/// String or string-array property naming the interfaces a provider offers.
pub const OBJECT_CLASS: &str = "objectClass";

/// Identity of one registered provider.
///
/// Equality is identity-based: two handles are equal only if they are clones of
/// the same catalog registration.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    properties: Properties,
}

impl Handle {
    pub fn new(id: u64, properties: Properties) -> Self {
        Self {
            inner: Arc::new(HandleInner { id, properties }),
        }
    }
    pub fn id(&self) -> u64 {
        self.inner.id
    }
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.inner.properties.get(key)
    }
    /// `service.ranking`, or 0 when absent or not an integer.
    pub fn ranking(&self) -> i64 {
        self.property(SERVICE_RANKING)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
    pub fn offers(&self, interface: &str) -> bool {
        match self.property(OBJECT_CLASS) {
            Some(serde_json::Value::String(s)) => s == interface,
            Some(serde_json::Value::Array(list)) => {
                list.iter().any(|v| v.as_str() == Some(interface))
            }
            _ => false,
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Handle {}
impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

// 自然顺序：ranking 升序；ranking 相同则注册更早（id 更小）的排在后面
impl Ord for Handle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ranking()
            .cmp(&other.ranking())
            .then_with(|| other.id().cmp(&self.id()))
    }
}
impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("properties", &self.inner.properties)
            .finish()
    }
}

/// Property filter: an optional interface plus exact-match properties.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub interface: Option<String>,
    pub properties: Properties,
}

impl Filter {
    pub fn any() -> Self {
        Self::default()
    }
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            properties: Properties::new(),
        }
    }
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
    pub fn matches(&self, handle: &Handle) -> bool {
        if let Some(iface) = &self.interface {
            if !handle.offers(iface) {
                return false;
            }
        }
        self.properties
            .iter()
            .all(|(k, v)| handle.property(k) == Some(v))
    }
}

/// The catalog collaborator.
pub trait Catalog<S: ?Sized>: Send + Sync {
    /// Snapshot of the handles currently matching `filter`.
    fn lookup(&self, filter: &Filter) -> Vec<Handle>;

    /// Resolve the instance behind `handle`. `Ok(None)` means the provider is gone.
    fn resolve_instance(&self, handle: &Handle) -> anyhow::Result<Option<Arc<S>>>;

    /// Give back an instance obtained from `resolve_instance`.
    fn release(&self, handle: &Handle) -> anyhow::Result<()>;

    /// Checked once before a dispatcher is built for `handle`; an error skips
    /// only that handle.
    fn admit(&self, _handle: &Handle) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogEvent {
    Arrival(Handle),
    Departure(Handle),
}

impl CatalogEvent {
    pub fn handle(&self) -> &Handle {
        match self {
            CatalogEvent::Arrival(h) | CatalogEvent::Departure(h) => h,
        }
    }
}

/// Asynchronous stream of raw catalog events.
#[async_trait]
pub trait EventSource: Send {
    /// `None` once the stream is closed.
    async fn next_event(&mut self) -> Option<CatalogEvent>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<CatalogEvent> {
    async fn next_event(&mut self) -> Option<CatalogEvent> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<CatalogEvent> {
    async fn next_event(&mut self) -> Option<CatalogEvent> {
        self.recv().await
    }
}
