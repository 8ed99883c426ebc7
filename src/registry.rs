use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{catalog::Filter, config::CollectionShape};

/// What a registry knows about one managed collection.
#[derive(Clone, Debug, Serialize)]
pub struct ManagedInfo {
    pub id: Uuid,
    pub name: String,
    pub filter: Filter,
    pub shape: CollectionShape,
}

/// Lifecycle side-channel for managed collections, injected into each tracker.
/// A tracker registers when it starts populating and unregisters when it stops.
pub trait ManagedRegistry: Send + Sync {
    fn register(&self, info: ManagedInfo);
    fn unregister(&self, id: Uuid);
}

/// In-process registry keyed by tracker id.
#[derive(Default)]
pub struct ManagedObjects {
    entries: RwLock<HashMap<Uuid, ManagedInfo>>,
}

impl ManagedObjects {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, id: Uuid) -> Option<ManagedInfo> {
        self.entries.read().get(&id).cloned()
    }
    pub fn by_name(&self, name: &str) -> Vec<ManagedInfo> {
        self.entries
            .read()
            .values()
            .filter(|info| info.name == name)
            .cloned()
            .collect()
    }
    pub fn all(&self) -> Vec<ManagedInfo> {
        self.entries.read().values().cloned().collect()
    }
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ManagedRegistry for ManagedObjects {
    fn register(&self, info: ManagedInfo) {
        tracing::debug!(id = %info.id, name = %info.name, "managed collection registered");
        if let Some(prev) = self.entries.write().insert(info.id, info) {
            tracing::warn!(id = %prev.id, "managed collection registered twice; replacing");
        }
    }
    fn unregister(&self, id: Uuid) {
        if self.entries.write().remove(&id).is_none() {
            tracing::trace!(%id, "unregister of unknown managed collection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let reg = ManagedObjects::new();
        let id = Uuid::new_v4();
        reg.register(ManagedInfo {
            id,
            name: "greeters".into(),
            filter: Filter::for_interface("Greeter"),
            shape: CollectionShape::List,
        });
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).map(|i| i.name), Some("greeters".to_string()));
        assert_eq!(reg.by_name("greeters").len(), 1);
        let json = serde_json::to_value(reg.all()).unwrap();
        assert_eq!(json[0]["shape"], "list");
        reg.unregister(id);
        reg.unregister(id);
        assert!(reg.is_empty());
    }
}
