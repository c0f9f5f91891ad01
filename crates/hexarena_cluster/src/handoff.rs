use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hexarena_runtime::StashSink;
use hexarena_session::Session;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fabric::Fabric;
use crate::node::NodeId;

/// The handoff key of a session.
pub fn handoff_key(session_id: Uuid) -> String {
    format!("session_{session_id}")
}

/// One node's copy of the replicated map. Peers push merged entries into each
/// other's replicas.
pub(crate) type HandoffReplica = Arc<RwLock<HashMap<String, HandoffEntry>>>;

#[derive(Clone, Debug)]
pub(crate) struct HandoffEntry {
    stamp: u64,
    /// `None` is the tombstone a delete leaves behind.
    value: Option<Value>,
}

/// An eventually-consistent, last-writer-wins replicated map holding session
/// state in transit between nodes.
///
/// Writes win by stamp, stamps are issued by the fabric, and deletes are
/// tombstones so a slow replica cannot resurrect a picked-up session. The
/// authoritative fallback for anything lost here is always the durable store.
#[derive(Clone)]
pub struct HandoffStore {
    node: NodeId,
    fabric: Fabric,
    local: HandoffReplica,
}

impl HandoffStore {
    pub(crate) fn new(node: NodeId, fabric: Fabric) -> Self {
        Self {
            node,
            fabric,
            local: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) fn replica(&self) -> HandoffReplica {
        self.local.clone()
    }

    pub fn put(&self, key: &str, value: Value) {
        let entry = HandoffEntry {
            stamp: self.fabric.next_stamp(),
            value: Some(value),
        };

        merge(&self.local, key, &entry);
        self.replicate(key, &entry);
    }

    /// The most recent visible value, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.local.read().get(key)?.value.clone()
    }

    pub fn delete(&self, key: &str) {
        let entry = HandoffEntry {
            stamp: self.fabric.next_stamp(),
            value: None,
        };

        merge(&self.local, key, &entry);
        self.replicate(key, &entry);
    }

    /// Consumes the entry under `key`, retrying every `retry` for up to
    /// `total` to ride out replication lag. `None` means the caller should
    /// fall back to the durable store.
    pub async fn pickup(&self, key: &str, retry: Duration, total: Duration) -> Option<Value> {
        let deadline = Instant::now() + total;

        loop {
            if let Some(value) = self.get(key) {
                self.delete(key);
                debug!(key, "picked up handoff entry");
                return Some(value);
            }

            if Instant::now() >= deadline {
                return None;
            }

            tokio::time::sleep(retry).await;
        }
    }

    /// Join-time anti-entropy: merges every peer's entries into the local
    /// replica.
    pub fn pull(&self) {
        for peer in self.fabric.peer_replicas(self.node) {
            let entries: Vec<(String, HandoffEntry)> = peer
                .read()
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect();

            for (key, entry) in entries {
                merge(&self.local, &key, &entry);
            }
        }
    }

    /// Blocks until the local stash is replicated to at least one live peer
    /// or `grace` lapses. Returns whether replication happened.
    pub async fn flush(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;

        loop {
            let peers = self.fabric.peer_replicas(self.node);

            if !peers.is_empty() {
                let entries: Vec<(String, HandoffEntry)> = self
                    .local
                    .read()
                    .iter()
                    .map(|(k, e)| (k.clone(), e.clone()))
                    .collect();

                for peer in &peers {
                    for (key, entry) in &entries {
                        merge(peer, key, entry);
                    }
                }

                return true;
            }

            if Instant::now() >= deadline {
                warn!(node = %self.node, "no live peer to replicate handoff stash to");
                return false;
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn replicate(&self, key: &str, entry: &HandoffEntry) {
        for peer in self.fabric.peer_replicas(self.node) {
            merge(&peer, key, entry);
        }
    }
}

/// Last-writer-wins merge of one entry into a replica.
fn merge(replica: &HandoffReplica, key: &str, entry: &HandoffEntry) {
    let mut map = replica.write();

    match map.get(key) {
        Some(existing) if existing.stamp >= entry.stamp => {}
        _ => {
            map.insert(key.to_owned(), entry.clone());
        }
    }
}

#[async_trait]
impl StashSink for HandoffStore {
    async fn stash(&self, session: &Session) {
        match hexarena_store::encode(session) {
            Ok(value) => self.put(&handoff_key(session.id), value),
            Err(e) => warn!(session_id = %session.id, error = %e, "failed to encode stash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fabric::NodeLink;
    use crate::registry::SpawnRequest;

    fn joined_store(fabric: &Fabric) -> HandoffStore {
        let node = NodeId::random();
        let store = HandoffStore::new(node, fabric.clone());

        // Nothing in these tests dispatches placements; the queue can hang up.
        let (spawn, _) = flume::unbounded::<SpawnRequest>();
        fabric.join(
            node,
            NodeLink {
                spawn,
                handoff: store.replica(),
            },
        );
        store.pull();

        store
    }

    #[tokio::test]
    async fn puts_replicate_to_peers() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        a.put("session_x", json!({"round": 3}));

        assert_eq!(b.get("session_x"), Some(json!({"round": 3})));
    }

    #[tokio::test]
    async fn deletes_tombstone_everywhere() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        a.put("session_x", json!(1));
        b.delete("session_x");

        assert_eq!(a.get("session_x"), None);
        assert_eq!(b.get("session_x"), None);
    }

    #[tokio::test]
    async fn later_writes_win() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        a.put("session_x", json!("old"));
        b.put("session_x", json!("new"));

        assert_eq!(a.get("session_x"), Some(json!("new")));
        assert_eq!(b.get("session_x"), Some(json!("new")));
    }

    #[tokio::test]
    async fn joining_node_pulls_existing_entries() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        a.put("session_x", json!(7));

        let late = joined_store(&fabric);

        assert_eq!(late.get("session_x"), Some(json!(7)));
    }

    #[tokio::test]
    async fn pickup_consumes_the_entry() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        a.put("session_x", json!(1));

        let value = b
            .pickup("session_x", Duration::from_millis(10), Duration::from_millis(100))
            .await;
        assert_eq!(value, Some(json!(1)));

        // Consumed everywhere, not just on the picking node.
        assert_eq!(a.get("session_x"), None);
        assert_eq!(
            b.pickup("session_x", Duration::from_millis(5), Duration::from_millis(20))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn pickup_waits_out_replication_lag() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            a.put("session_x", json!("late"));
        });

        let value = b
            .pickup("session_x", Duration::from_millis(10), Duration::from_millis(250))
            .await;

        writer.await.unwrap();
        assert_eq!(value, Some(json!("late")));
    }

    #[tokio::test]
    async fn flush_without_peers_times_out() {
        let fabric = Fabric::new();
        let lonely = joined_store(&fabric);
        lonely.put("session_x", json!(1));

        assert!(!lonely.flush(Duration::from_millis(60)).await);
    }

    #[tokio::test]
    async fn flush_with_a_peer_succeeds() {
        let fabric = Fabric::new();
        let a = joined_store(&fabric);
        let b = joined_store(&fabric);

        a.put("session_x", json!(1));
        assert!(a.flush(Duration::from_millis(60)).await);
        assert_eq!(b.get("session_x"), Some(json!(1)));
    }
}
