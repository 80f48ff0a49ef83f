//! Datastore
//!
//! Process-wide named key/value coordination surface with atomic
//! composite operations, blocking waits, and key expiry (`spec.md` §4.D).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::value::Value;

/// Maps namespace name -> instance. Creation is atomic: two concurrent
/// `datastore(name)` calls for a never-seen name race on the outer lock,
/// and only one instance wins (`spec.md` §5 "shared-resource policy").
pub struct DatastoreRegistry {
    instances: RwLock<HashMap<String, Arc<DatastoreInstance>>>,
}

impl DatastoreRegistry {
    pub fn new() -> Self {
        Self { instances: RwLock::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<DatastoreInstance> {
        if let Some(existing) = self.instances.read().await.get(name) {
            return existing.clone();
        }
        let mut guard = self.instances.write().await;
        if let Some(existing) = guard.get(name) {
            return existing.clone();
        }
        let instance = Arc::new(DatastoreInstance::new(name.to_string()));
        instance.clone().spawn_sweeper();
        guard.insert(name.to_string(), instance.clone());
        instance
    }
}

impl Default for DatastoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// A single namespace. All composite read-modify-write operations take
/// `data`'s lock for their whole critical section (`spec.md` §9 "Atomicity
/// of composite ops"); `wait_for`-style predicate evaluation snapshots the
/// value, releases the lock, then evaluates — that half lives in the
/// `wait_for`/`shift_wait`/`pop_wait` builtins since predicates are script
/// closures that need an `&mut Evaluator` to call.
pub struct DatastoreInstance {
    pub name: String,
    data: RwLock<HashMap<String, Entry>>,
    waiters: RwLock<HashMap<String, Arc<Notify>>>,
}

/// Sentinel wait outcome: `Notified` when a writer broadcast before the
/// timeout, `TimedOut` when the timeout elapsed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
    Cancelled,
}

impl DatastoreInstance {
    fn new(name: String) -> Self {
        Self { name, data: RwLock::new(HashMap::new()), waiters: RwLock::new(HashMap::new()) }
    }

    async fn notifier_for(&self, key: &str) -> Arc<Notify> {
        if let Some(n) = self.waiters.read().await.get(key) {
            return n.clone();
        }
        let mut guard = self.waiters.write().await;
        guard.entry(key.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    async fn notify_key(&self, key: &str) {
        if let Some(n) = self.waiters.read().await.get(key) {
            n.notify_waiters();
        }
    }

    async fn notify_all(&self) {
        for n in self.waiters.read().await.values() {
            n.notify_waiters();
        }
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }

    /// Returns a deep copy; missing or expired keys return `None`
    /// (`spec.md` §4.D `get`, invariant 2).
    pub async fn get(&self, key: &str) -> Option<Value> {
        let guard = self.data.read().await;
        let entry = guard.get(key)?;
        if !Self::is_live(entry) {
            return None;
        }
        Some(entry.value.deep_copy().await)
    }

    pub async fn set(&self, key: &str, value: Value) {
        let copy = value.deep_copy().await;
        self.data.write().await.insert(key.to_string(), Entry { value: copy, expires_at: None });
        self.notify_key(key).await;
    }

    /// Sets only if absent/expired; returns whether this call won the
    /// race (`spec.md` §8 invariant 4).
    pub async fn set_once(&self, key: &str, value: Value) -> bool {
        let mut guard = self.data.write().await;
        let absent = guard.get(key).map(|e| !Self::is_live(e)).unwrap_or(true);
        if absent {
            let copy = value.deep_copy().await;
            guard.insert(key.to_string(), Entry { value: copy, expires_at: None });
        }
        drop(guard);
        if absent {
            self.notify_key(key).await;
        }
        absent
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.data.read().await.get(key).map(Self::is_live).unwrap_or(false)
    }

    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.data.write().await.remove(key).is_some();
        self.notify_key(key).await;
        removed
    }

    pub async fn rename(&self, old: &str, new: &str) -> bool {
        let mut guard = self.data.write().await;
        if let Some(entry) = guard.remove(old) {
            guard.insert(new.to_string(), entry);
            drop(guard);
            self.notify_key(old).await;
            self.notify_key(new).await;
            true
        } else {
            false
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.data.read().await.iter().filter(|(_, e)| Self::is_live(e)).map(|(k, _)| k.clone()).collect()
    }

    pub async fn clear(&self) {
        self.data.write().await.clear();
        self.notify_all().await;
    }

    pub async fn increment(&self, key: &str, delta: f64) -> f64 {
        let mut guard = self.data.write().await;
        let current = guard.get(key).filter(|e| Self::is_live(e)).map(|e| e.value.to_number()).unwrap_or(0.0);
        let next = current + delta;
        guard.insert(key.to_string(), Entry { value: Value::Number(next), expires_at: None });
        drop(guard);
        self.notify_key(key).await;
        next
    }

    pub async fn swap(&self, key: &str, value: Value) -> Value {
        let copy = value.deep_copy().await;
        let mut guard = self.data.write().await;
        let old = guard
            .insert(key.to_string(), Entry { value: copy, expires_at: None })
            .filter(Self::is_live)
            .map(|e| e.value)
            .unwrap_or(Value::Nil);
        drop(guard);
        self.notify_key(key).await;
        old
    }

    async fn with_array<T>(&self, key: &str, f: impl FnOnce(&mut Vec<Value>) -> T) -> Result<T, String> {
        let mut guard = self.data.write().await;
        let entry = guard.entry(key.to_string()).or_insert_with(|| Entry { value: Value::array(vec![]), expires_at: None });
        match &entry.value {
            Value::Array(arr) => {
                let arr = arr.clone();
                drop(guard);
                let mut locked = arr.write().await;
                Ok(f(&mut locked))
            }
            other => Err(format!("key '{}' does not hold an array (holds {})", key, other.type_name())),
        }
    }

    pub async fn push(&self, key: &str, value: Value) -> Result<usize, String> {
        let copy = value.deep_copy().await;
        let len = self.with_array(key, |arr| {
            arr.push(copy);
            arr.len()
        }).await?;
        self.notify_key(key).await;
        Ok(len)
    }

    pub async fn unshift(&self, key: &str, value: Value) -> Result<usize, String> {
        let copy = value.deep_copy().await;
        let len = self.with_array(key, |arr| {
            arr.insert(0, copy);
            arr.len()
        }).await?;
        self.notify_key(key).await;
        Ok(len)
    }

    pub async fn pop(&self, key: &str) -> Result<Option<Value>, String> {
        let v = self.with_array(key, |arr| arr.pop()).await?;
        if v.is_some() {
            self.notify_key(key).await;
        }
        Ok(v)
    }

    pub async fn shift(&self, key: &str) -> Result<Option<Value>, String> {
        let v = self.with_array(key, |arr| if arr.is_empty() { None } else { Some(arr.remove(0)) }).await?;
        if v.is_some() {
            self.notify_key(key).await;
        }
        Ok(v)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) {
        if let Some(entry) = self.data.write().await.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    /// Blocks until notified on `key` or `timeout` elapses, whichever
    /// first (`spec.md` §9 "Cancellable blocking"). Callers loop and
    /// re-check their own condition; this is the raw primitive that
    /// `wait`/`wait_for`/`shift_wait`/`pop_wait` build on.
    pub async fn wait_raw(
        &self,
        key: &str,
        timeout: Duration,
        cancellation: &crate::context::CancellationToken,
    ) -> WaitOutcome {
        let notify = self.notifier_for(key).await;
        let notified = notify.notified();
        tokio::pin!(notified);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let poll_interval = Duration::from_millis(20).min(timeout);
        loop {
            tokio::select! {
                _ = &mut notified => return WaitOutcome::Notified,
                _ = tokio::time::sleep(poll_interval) => {
                    if cancellation.is_cancelled() {
                        return WaitOutcome::Cancelled;
                    }
                }
                _ = &mut deadline => return WaitOutcome::TimedOut,
            }
        }
    }

    /// Background task per instance: sweeps expired keys and rebroadcasts
    /// on their waiters so blocked calls re-evaluate against absence
    /// (`spec.md` §4.D, §9 "Datastore condition variables").
    fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                let expired: Vec<String> = {
                    let guard = self.data.read().await;
                    guard.iter().filter(|(_, e)| !Self::is_live(e)).map(|(k, _)| k.clone()).collect()
                };
                if expired.is_empty() {
                    continue;
                }
                let mut guard = self.data.write().await;
                for key in &expired {
                    guard.remove(key);
                }
                drop(guard);
                for key in &expired {
                    debug!(namespace = %self.name, key = %key, "datastore key expired");
                    self.notify_key(key).await;
                }
            }
        });
    }
}

/// Best-effort JSON persistence (`spec.md` §6 "Datastore persistence
/// format"). Load-on-open only; failures are logged, never propagated.
pub async fn load_persisted(instance: &DatastoreInstance, path: &std::path::Path) {
    let Ok(bytes) = tokio::fs::read(path).await else { return };
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(map)) => {
            for (k, v) in map {
                instance.set(&k, Value::from_json(&v)).await;
            }
        }
        Ok(_) => warn!(path = %path.display(), "datastore persistence file is not a JSON object"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to parse datastore persistence file"),
    }
}

pub async fn persist(instance: &DatastoreInstance, path: &std::path::Path) {
    let mut map = serde_json::Map::new();
    for key in instance.keys().await {
        if let Some(v) = instance.get(&key).await {
            map.insert(key, v.to_json().await);
        }
    }
    if let Ok(bytes) = serde_json::to_vec_pretty(&serde_json::Value::Object(map)) {
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!(path = %path.display(), error = %e, "failed to persist datastore namespace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn set_then_get_returns_deep_copy() {
        let registry = DatastoreRegistry::new();
        let store = registry.get_or_create("c").await;
        store.set("n", Value::array(vec![Value::Number(1.0)])).await;
        let read_back = store.get("n").await.unwrap();
        if let Value::Array(arr) = &read_back {
            arr.write().await.push(Value::Number(2.0));
        }
        let second_read = store.get("n").await.unwrap();
        if let Value::Array(arr) = &second_read {
            assert_eq!(arr.read().await.len(), 1);
        } else {
            panic!("expected array");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_name_returns_same_instance() {
        let registry = DatastoreRegistry::new();
        let a = registry.get_or_create("x").await;
        let b = registry.get_or_create("x").await;
        a.set("k", Value::Number(1.0)).await;
        assert_eq!(b.get("k").await.unwrap().to_number(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_once_only_wins_first_call() {
        let registry = DatastoreRegistry::new();
        let store = registry.get_or_create("c").await;
        assert!(store.set_once("k", Value::Number(1.0)).await);
        assert!(!store.set_once("k", Value::Number(2.0)).await);
        assert_eq!(store.get("k").await.unwrap().to_number(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_increments_sum_correctly() {
        let registry = Arc::new(DatastoreRegistry::new());
        let store = registry.get_or_create("c").await;
        store.set("n", Value::Number(0.0)).await;
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("n", 1.0).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("n").await.unwrap().to_number(), 50.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_and_shift_roundtrip_in_order() {
        let registry = DatastoreRegistry::new();
        let store = registry.get_or_create("q").await;
        store.push("items", Value::Number(1.0)).await.unwrap();
        store.push("items", Value::Number(2.0)).await.unwrap();
        assert_eq!(store.shift("items").await.unwrap().unwrap().to_number(), 1.0);
        assert_eq!(store.shift("items").await.unwrap().unwrap().to_number(), 2.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_wakes_waiters_with_timeout_outcome() {
        let registry = Arc::new(DatastoreRegistry::new());
        let store = registry.get_or_create("c").await;
        let cancel = crate::context::CancellationToken::new();
        let waiter_store = store.clone();
        let handle = tokio::spawn(async move {
            waiter_store.wait_raw("k", Duration::from_secs(5), &cancel).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.delete("k").await;
        let outcome = handle.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Notified);
    }
}
