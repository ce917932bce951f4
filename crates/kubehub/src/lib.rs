//! fnpkg kubehub – typed clients for the platform's custom resources.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use fnpkg_core::{ClientError, Function, Package, ResourceClient, WatchEvent};
use futures::TryStreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    runtime::watcher::{self, Event},
    Client, Resource,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const WATCH_QUEUE_CAP: usize = 1024;

/// Build a kube client from the local kubeconfig or in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client (kubeconfig or in-cluster env)")
}

/// Namespaced `ResourceClient` backed by the Kubernetes API server.
pub struct KubeResourceClient<K> {
    api: Api<K>,
}

impl<K> KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    pub fn new(client: Client, namespace: &str) -> Self {
        Self { api: Api::namespaced(client, namespace) }
    }
}

pub type PackageClient = KubeResourceClient<Package>;
pub type FunctionClient = KubeResourceClient<Function>;

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

/// Map API-server failures onto the resource-client error kinds.
fn map_kube_err<K: Resource<DynamicType = ()>>(e: kube::Error, name: &str) -> ClientError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound { kind: kind_of::<K>(), name: name.to_string() },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            ClientError::AlreadyExists { kind: kind_of::<K>(), name: name.to_string() }
        }
        kube::Error::Api(ae) if ae.code == 409 => ClientError::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
            stale: ae.message,
        },
        other => ClientError::Transport(Box::new(other)),
    }
}

fn name_of<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, ClientError> {
        let name = name_of(obj);
        counter!("kube_write_total", 1u64);
        self.api.create(&PostParams::default(), obj).await.map_err(|e| map_kube_err::<K>(e, &name))
    }

    async fn get(&self, name: &str) -> Result<K, ClientError> {
        self.api.get(name).await.map_err(|e| map_kube_err::<K>(e, name))
    }

    async fn update(&self, obj: &K) -> Result<K, ClientError> {
        let name = name_of(obj);
        counter!("kube_write_total", 1u64);
        self.api.replace(&name, &PostParams::default(), obj).await.map_err(|e| map_kube_err::<K>(e, &name))
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        counter!("kube_write_total", 1u64);
        self.api.delete(name, &DeleteParams::default()).await.map_err(|e| map_kube_err::<K>(e, name))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<K>, ClientError> {
        let list = self.api.list(&ListParams::default()).await.map_err(|e| map_kube_err::<K>(e, ""))?;
        debug!(kind = %kind_of::<K>(), count = list.items.len(), "listed");
        Ok(list.items)
    }

    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent<K>>, ClientError> {
        let (tx, rx) = mpsc::channel(WATCH_QUEUE_CAP);
        let api = self.api.clone();
        tokio::spawn(async move {
            let stream = watcher::watcher(api, watcher::Config::default());
            futures::pin_mut!(stream);
            info!(kind = %kind_of::<K>(), "watcher started");
            loop {
                let ev = match stream.try_next().await {
                    Ok(Some(ev)) => ev,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "watch stream failed");
                        break;
                    }
                };
                let batch = match ev {
                    Event::Applied(o) => vec![WatchEvent::Applied(o)],
                    Event::Deleted(o) => vec![WatchEvent::Deleted(o)],
                    Event::Restarted(list) => {
                        debug!(count = list.len(), "watch restart");
                        list.into_iter().map(WatchEvent::Applied).collect()
                    }
                };
                for we in batch {
                    if tx.send(we).await.is_err() {
                        debug!("watch receiver dropped");
                        return;
                    }
                }
            }
            warn!("watcher stream ended");
        });
        Ok(rx)
    }
}
