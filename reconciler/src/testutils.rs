use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::cluster::{ClusterClient, ClusterError, PathRegistry};
use crate::resources::{
    LabelSelector, NamespaceObject, ObjectKey, ReceiverResource, ReceiverStatus, ServiceObject,
};

/// In-memory control plane double: a world of receivers, services and
/// namespaces plus a record of every status patch.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    receivers: HashMap<ObjectKey, ReceiverResource>,
    services: HashMap<ObjectKey, ServiceObject>,
    namespaces: HashMap<String, NamespaceObject>,
    patches: Vec<(ObjectKey, ReceiverStatus)>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_receiver(&self, receiver: ReceiverResource) {
        self.state
            .lock()
            .receivers
            .insert(receiver.key.clone(), receiver);
    }

    pub fn remove_receiver(&self, key: &ObjectKey) {
        self.state.lock().receivers.remove(key);
    }

    pub fn put_service(&self, service: ServiceObject) {
        self.state
            .lock()
            .services
            .insert(service.key.clone(), service);
    }

    pub fn put_namespace(&self, namespace: NamespaceObject) {
        self.state
            .lock()
            .namespaces
            .insert(namespace.name.clone(), namespace);
    }

    pub fn receiver(&self, key: &ObjectKey) -> Option<ReceiverResource> {
        self.state.lock().receivers.get(key).cloned()
    }

    pub fn patches(&self) -> Vec<(ObjectKey, ReceiverStatus)> {
        self.state.lock().patches.clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_receiver(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ReceiverResource>, ClusterError> {
        Ok(self.state.lock().receivers.get(key).cloned())
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<ServiceObject>, ClusterError> {
        Ok(self.state.lock().services.get(key).cloned())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceObject>, ClusterError> {
        Ok(self.state.lock().namespaces.get(name).cloned())
    }

    async fn list_namespaces(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<NamespaceObject>, ClusterError> {
        let mut namespaces: Vec<NamespaceObject> = self
            .state
            .lock()
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
        let mut state = self.state.lock();
        state.patches.push((key.clone(), status.clone()));

        if let Some(receiver) = state.receivers.get_mut(key) {
            receiver.status = status.clone();
        }
        Ok(())
    }
}

/// Registry double recording every registration and unregistration.
#[derive(Default)]
pub struct RecordingRegistry {
    receivers: Mutex<HashMap<String, proxy::registry::Receiver>>,
    unregistered: Mutex<Vec<String>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<proxy::registry::Receiver> {
        self.receivers.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.receivers.lock().len()
    }

    pub fn unregistered(&self) -> Vec<String> {
        self.unregistered.lock().clone()
    }
}

impl PathRegistry for RecordingRegistry {
    fn register_or_update(
        &self,
        receiver: proxy::registry::Receiver,
    ) -> Result<(), proxy::registry::RegistryError> {
        if receiver.path.is_empty() {
            return Err(proxy::registry::RegistryError::EmptyPath);
        }
        self.receivers
            .lock()
            .insert(receiver.path.clone(), receiver);
        Ok(())
    }

    fn unregister(&self, path: &str) -> Result<(), proxy::registry::RegistryError> {
        self.receivers.lock().remove(path);
        self.unregistered.lock().push(path.to_string());
        Ok(())
    }
}
