//! HTTP dispatcher (`spec.md` §4.E).

pub mod request;
pub mod server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

pub use server::HttpServerHandle;

/// Process-wide registry of live server handles, keyed by the logical id
/// carried in `HandleKind::HttpServer` (`spec.md` §3 "handle").
pub struct HttpServerRegistry {
    next_id: AtomicU64,
    handles: RwLock<HashMap<String, Arc<HttpServerHandle>>>,
}

impl HttpServerRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), handles: RwLock::new(HashMap::new()) }
    }

    pub fn fresh_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn insert(&self, id: String, handle: Arc<HttpServerHandle>) {
        self.handles.write().await.insert(id, handle);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<HttpServerHandle>> {
        self.handles.read().await.get(id).cloned()
    }
}

impl Default for HttpServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
