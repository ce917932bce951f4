//! fnpkg store: in-RAM `ResourceClient` with monotonically increasing resource versions.
//!
//! Writes carrying a resourceVersion that no longer matches the stored one are
//! rejected with `ClientError::Conflict`, mirroring the API server's optimistic
//! concurrency. Used by tests.

#![forbid(unsafe_code)]

use std::sync::Mutex;

use fnpkg_core::{ClientError, ResourceClient, WatchEvent};
use kube::Resource;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::debug;

const WATCH_QUEUE_CAP: usize = 256;

struct State<K> {
    items: FxHashMap<String, K>,
    /// Insertion order, so `list` is stable across calls.
    order: Vec<String>,
    next_rv: u64,
    /// Feeds of live watches; each is drained into the caller's bounded channel by a forwarder task.
    watchers: Vec<mpsc::UnboundedSender<WatchEvent<K>>>,
}

pub struct MemoryStore<K> {
    namespace: String,
    state: Mutex<State<K>>,
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(State { items: FxHashMap::default(), order: Vec::new(), next_rv: 1, watchers: Vec::new() }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn name_of(obj: &K) -> Result<String, ClientError> {
        match obj.meta().name.as_deref() {
            Some(n) if !n.is_empty() => Ok(n.to_string()),
            _ => Err(ClientError::Transport(format!("{} without metadata.name", Self::kind()).into())),
        }
    }

    fn not_found(name: &str) -> ClientError {
        ClientError::NotFound { kind: Self::kind(), name: name.to_string() }
    }
}

impl<K> State<K>
where
    K: Clone,
{
    fn stamp(&mut self) -> String {
        let rv = self.next_rv;
        self.next_rv += 1;
        rv.to_string()
    }

    fn notify(&mut self, ev: WatchEvent<K>) {
        // A failed send means the forwarder exited because the receiver was dropped.
        self.watchers.retain(|tx| tx.send(ev.clone()).is_ok());
    }
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, ClientError> {
        let name = Self::name_of(obj)?;
        let mut st = self.lock();
        if st.items.contains_key(&name) {
            return Err(ClientError::AlreadyExists { kind: Self::kind(), name });
        }
        let mut stored = obj.clone();
        let rv = st.stamp();
        let meta = stored.meta_mut();
        meta.resource_version = Some(rv.clone());
        if meta.namespace.is_none() {
            meta.namespace = Some(self.namespace.clone());
        }
        st.items.insert(name.clone(), stored.clone());
        st.order.push(name.clone());
        st.notify(WatchEvent::Applied(stored.clone()));
        debug!(kind = %Self::kind(), name = %name, rv = %rv, "created");
        Ok(stored)
    }

    async fn get(&self, name: &str) -> Result<K, ClientError> {
        self.lock().items.get(name).cloned().ok_or_else(|| Self::not_found(name))
    }

    async fn update(&self, obj: &K) -> Result<K, ClientError> {
        let name = Self::name_of(obj)?;
        let mut st = self.lock();
        let current_rv = match st.items.get(&name) {
            Some(cur) => cur.meta().resource_version.clone().unwrap_or_default(),
            None => return Err(Self::not_found(&name)),
        };
        if let Some(sent) = obj.meta().resource_version.as_deref() {
            if sent != current_rv {
                return Err(ClientError::Conflict { kind: Self::kind(), name, stale: sent.to_string() });
            }
        }
        let mut stored = obj.clone();
        let rv = st.stamp();
        let meta = stored.meta_mut();
        meta.resource_version = Some(rv.clone());
        if meta.namespace.is_none() {
            meta.namespace = Some(self.namespace.clone());
        }
        st.items.insert(name.clone(), stored.clone());
        st.notify(WatchEvent::Applied(stored.clone()));
        debug!(kind = %Self::kind(), name = %name, rv = %rv, "updated");
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        let mut st = self.lock();
        let removed = st.items.remove(name).ok_or_else(|| Self::not_found(name))?;
        st.order.retain(|n| n != name);
        st.notify(WatchEvent::Deleted(removed));
        debug!(kind = %Self::kind(), name = %name, "deleted");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<K>, ClientError> {
        let st = self.lock();
        Ok(st.order.iter().filter_map(|n| st.items.get(n).cloned()).collect())
    }

    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent<K>>, ClientError> {
        let (tx, rx) = mpsc::channel(WATCH_QUEUE_CAP);
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        {
            let mut st = self.lock();
            // Replay current state first, like a list+watch restart.
            for n in &st.order {
                if let Some(obj) = st.items.get(n) {
                    if feed_tx.send(WatchEvent::Applied(obj.clone())).is_err() {
                        break;
                    }
                }
            }
            debug!(kind = %Self::kind(), replayed = st.order.len(), "watch started");
            st.watchers.push(feed_tx);
        }
        let kind = Self::kind();
        tokio::spawn(async move {
            while let Some(ev) = feed_rx.recv().await {
                if tx.send(ev).await.is_err() {
                    debug!(kind = %kind, "watch receiver dropped");
                    return;
                }
            }
        });
        Ok(rx)
    }
}
