//! File-defined control plane.
//!
//! Resources are loaded from the config file and fixed for the process
//! lifetime; one event per receiver seeds the dispatcher at startup. Status
//! patches land in memory and in the log, there is nothing durable to write
//! back to.

use async_trait::async_trait;
use parking_lot::RwLock;
use reconciler::cluster::{ClusterClient, ClusterError, ClusterEvent};
use reconciler::resources::{
    LabelSelector, NamespaceObject, ObjectKey, ReceiverResource, ReceiverStatus, ServiceObject,
};
use std::collections::HashMap;

use crate::config::ClusterConfig;

pub struct StaticCluster {
    receivers: RwLock<HashMap<ObjectKey, ReceiverResource>>,
    services: HashMap<ObjectKey, ServiceObject>,
    namespaces: HashMap<String, NamespaceObject>,
}

impl StaticCluster {
    pub fn new(config: ClusterConfig) -> Self {
        let receivers = config
            .receivers
            .into_iter()
            .map(|r| {
                let key = ObjectKey::new(&r.namespace, &r.name);
                let resource = ReceiverResource {
                    key: key.clone(),
                    generation: 1,
                    spec: r.spec,
                    status: ReceiverStatus::default(),
                };
                (key, resource)
            })
            .collect();

        let services = config
            .services
            .into_iter()
            .map(|s| {
                let key = ObjectKey::new(&s.namespace, &s.name);
                let service = ServiceObject {
                    key: key.clone(),
                    cluster_address: s.cluster_address,
                    ports: s.ports,
                };
                (key, service)
            })
            .collect();

        let namespaces = config
            .namespaces
            .into_iter()
            .map(|ns| (ns.name.clone(), ns))
            .collect();

        Self {
            receivers: RwLock::new(receivers),
            services,
            namespaces,
        }
    }

    /// One event per configured receiver, delivered once at startup.
    pub fn seed_events(&self) -> Vec<ClusterEvent> {
        let mut keys: Vec<ObjectKey> = self.receivers.read().keys().cloned().collect();
        keys.sort();
        keys.into_iter().map(ClusterEvent::Receiver).collect()
    }
}

#[async_trait]
impl ClusterClient for StaticCluster {
    async fn get_receiver(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ReceiverResource>, ClusterError> {
        Ok(self.receivers.read().get(key).cloned())
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<ServiceObject>, ClusterError> {
        Ok(self.services.get(key).cloned())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceObject>, ClusterError> {
        Ok(self.namespaces.get(name).cloned())
    }

    async fn list_namespaces(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<NamespaceObject>, ClusterError> {
        let mut namespaces: Vec<NamespaceObject> = self
            .namespaces
            .values()
            .filter(|ns| selector.matches(&ns.labels))
            .cloned()
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &ReceiverStatus,
    ) -> Result<(), ClusterError> {
        if let Some(condition) = status
            .conditions
            .iter()
            .find(|c| c.r#type == reconciler::resources::READY_CONDITION)
        {
            tracing::info!(
                receiver = %key,
                ready = condition.status,
                reason = %condition.reason,
                message = %condition.message,
                webhook_path = %status.webhook_path,
                "receiver status updated"
            );
        }

        if let Some(receiver) = self.receivers.write().get_mut(key) {
            receiver.status = status.clone();
        }
        Ok(())
    }
}
