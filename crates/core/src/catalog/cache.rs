use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::domain::catalog::{ApprovalType, FlowId, FlowWithNodes};

/// TTL cache in front of catalog reads. A `None` TTL turns every call into a
/// miss and keeps nothing.
#[derive(Debug, Default)]
pub struct CatalogCache {
    ttl: Option<Duration>,
    flows: TtlMap<FlowId, FlowWithNodes>,
    types: TtlMap<String, ApprovalType>,
}

impl CatalogCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { ttl, flows: TtlMap::default(), types: TtlMap::default() }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn flow(&self, id: FlowId) -> Option<FlowWithNodes> {
        self.flows.get(&id)
    }

    pub fn put_flow(&self, value: FlowWithNodes) {
        if let Some(ttl) = self.ttl {
            self.flows.put(value.flow.id, value, ttl);
        }
    }

    pub fn invalidate_flow(&self, id: FlowId) {
        self.flows.remove(&id);
    }

    pub fn approval_type(&self, code: &str) -> Option<ApprovalType> {
        self.types.get(&code.to_string())
    }

    pub fn put_type(&self, value: ApprovalType) {
        if let Some(ttl) = self.ttl {
            self.types.put(value.code.clone(), value, ttl);
        }
    }

    pub fn invalidate_type(&self, code: &str) {
        self.types.remove(&code.to_string());
    }

    pub fn clear(&self) {
        self.flows.clear();
        self.types.clear();
    }
}

#[derive(Debug)]
struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> Default for TtlMap<K, V> {
    fn default() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(key)
            .filter(|(expires_at, _)| *expires_at > Instant::now())
            .map(|(_, value)| value.clone())
    }

    fn put(&self, key: K, value: V, ttl: Duration) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, (expires_at, _)| *expires_at > Instant::now());
        entries.insert(key, (Instant::now() + ttl, value));
    }

    fn remove(&self, key: &K) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.remove(key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(key);
            }
        }
    }

    fn clear(&self) {
        match self.entries.write() {
            Ok(mut entries) => entries.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
