//! The control-plane seam.
//!
//! The reconciler is host-agnostic: whatever delivers resource events and
//! answers indexed lookups implements [`ClusterClient`], and whatever owns
//! the proxy registration table implements [`PathRegistry`].

use async_trait::async_trait;
use thiserror::Error;

use crate::resources::{
    LabelSelector, NamespaceObject, ObjectKey, ReceiverResource, ReceiverStatus, ServiceObject,
};

#[derive(Error, Debug)]
pub enum ClusterError {
    /// Lookup or patch failed for a reason worth retrying; the dispatcher
    /// relies on the control plane re-delivering the event.
    #[error("transient control plane failure: {0}")]
    Transient(String),

    #[error("status patch conflict for {0}")]
    Conflict(ObjectKey),
}

/// A change notification from the control plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A receiver was created, updated or deleted.
    Receiver(ObjectKey),
    /// A service changed; affected receivers are found through the reverse
    /// index.
    Service(ObjectKey),
    /// A namespace changed; receivers with selector-bearing targets are
    /// re-evaluated.
    Namespace(String),
}

/// Indexed lookups and the status patch operation the reconciler requires
/// from its host.
///
/// `patch_status` must be a conflict-safe merge against the latest observed
/// version of the resource.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_receiver(&self, key: &ObjectKey)
    -> Result<Option<ReceiverResource>, ClusterError>;

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<ServiceObject>, ClusterError>;

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceObject>, ClusterError>;

    async fn list_namespaces(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<NamespaceObject>, ClusterError>;

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &ReceiverStatus,
    ) -> Result<(), ClusterError>;
}

/// The proxy capability pair the reconciler drives: upsert and removal of
/// registrations, keyed by webhook path.
pub trait PathRegistry: Send + Sync {
    fn register_or_update(
        &self,
        receiver: proxy::registry::Receiver,
    ) -> Result<(), proxy::registry::RegistryError>;

    fn unregister(&self, path: &str) -> Result<(), proxy::registry::RegistryError>;
}

impl PathRegistry for proxy::engine::FanoutProxy {
    fn register_or_update(
        &self,
        receiver: proxy::registry::Receiver,
    ) -> Result<(), proxy::registry::RegistryError> {
        proxy::engine::FanoutProxy::register_or_update(self, receiver)
    }

    fn unregister(&self, path: &str) -> Result<(), proxy::registry::RegistryError> {
        proxy::engine::FanoutProxy::unregister(self, path)
    }
}
