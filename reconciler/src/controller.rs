use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::cluster::{ClusterClient, ClusterError, ClusterEvent, PathRegistry};
use crate::index::TargetIndex;
use crate::metrics_defs::{RECONCILE_DURATION, REGISTERED_RECEIVERS};
use crate::resources::{
    ObjectKey, ReceiverResource, ResourceReference, SERVICE_BACKEND_READY_REASON,
    SERVICE_NOT_FOUND_REASON, SERVICE_PORT_NOT_FOUND_REASON, ServiceObject, ServicePortRef,
};

/// Alphabet of the generated webhook path: lowercase alphanumerics without
/// the ambiguous zero.
const WEBHOOK_PATH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz123456789";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("registry rejected the registration: {0}")]
    Registry(#[from] proxy::registry::RegistryError),
}

/// Keeps the proxy registration table in sync with declarative receiver
/// resources.
pub struct ReceiverController {
    cluster: Arc<dyn ClusterClient>,
    registry: Arc<dyn PathRegistry>,
    index: TargetIndex,
    /// webhook paths handed out so far; needed to unregister deleted
    /// receivers, whose status is no longer retrievable.
    assigned_paths: Mutex<HashMap<ObjectKey, String>>,
    /// Paths currently registered on the proxy, mirrored for the
    /// registered-receivers gauge.
    registered_paths: Mutex<HashSet<String>>,
    rng: Mutex<StdRng>,
}

impl ReceiverController {
    /// Production constructor; the path generator is seeded once from the
    /// OS entropy source.
    pub fn new(cluster: Arc<dyn ClusterClient>, registry: Arc<dyn PathRegistry>) -> Self {
        Self::with_rng(cluster, registry, StdRng::from_os_rng())
    }

    /// Constructor with a caller-provided generator for reproducible paths.
    pub fn with_seed(
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<dyn PathRegistry>,
        seed: u64,
    ) -> Self {
        Self::with_rng(cluster, registry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<dyn PathRegistry>,
        rng: StdRng,
    ) -> Self {
        Self {
            cluster,
            registry,
            index: TargetIndex::new(),
            assigned_paths: Mutex::new(HashMap::new()),
            registered_paths: Mutex::new(HashSet::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Maps a control-plane event to the receivers it affects.
    pub async fn affected(&self, event: &ClusterEvent) -> Result<Vec<ObjectKey>, ClusterError> {
        match event {
            ClusterEvent::Receiver(key) => Ok(vec![key.clone()]),
            ClusterEvent::Service(key) => {
                let labels = self
                    .cluster
                    .get_namespace(&key.namespace)
                    .await?
                    .map(|ns| ns.labels)
                    .unwrap_or_default();
                Ok(self.index.affected_by_service(key, &labels))
            }
            ClusterEvent::Namespace(_) => Ok(self.index.affected_by_namespace()),
        }
    }

    /// Converges one receiver: resolves its targets, updates the proxy
    /// registration and patches the status. Transient control-plane errors
    /// propagate for retry; per-target resolution misses are skipped.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(mut receiver) = self.cluster.get_receiver(key).await? else {
            self.forget(key);
            return Ok(());
        };

        if receiver.spec.suspend {
            tracing::debug!(namespace = %key.namespace, name = %key.name, "receiver is suspended");
            return Ok(());
        }

        tracing::info!(namespace = %key.namespace, name = %key.name, "reconciling receiver");
        let started = Instant::now();

        receiver.status.observed_generation = receiver.generation;

        if receiver.status.webhook_path.is_empty() {
            receiver.status.webhook_path = self
                .assigned_paths
                .lock()
                .get(key)
                .cloned()
                .unwrap_or_else(|| format!("/hooks/{}", self.rand_seq(32)));
        }
        self.assigned_paths
            .lock()
            .insert(key.clone(), receiver.status.webhook_path.clone());

        let resolved = self.resolve_targets(&receiver).await?;
        self.index.update(key, &receiver.spec.targets);

        receiver.status.sub_resource_catalog =
            resolved.iter().map(|r| r.reference.clone()).collect();

        let outcome = if resolved.is_empty() {
            self.registry.unregister(&receiver.status.webhook_path)?;
            self.registered_paths
                .lock()
                .remove(&receiver.status.webhook_path);
            receiver.mark_not_ready(SERVICE_BACKEND_READY_REASON, "no targets found");
            "not_ready"
        } else {
            self.registry
                .register_or_update(proxy::registry::Receiver {
                    path: receiver.status.webhook_path.clone(),
                    timeout: receiver.spec.timeout(),
                    targets: resolved.into_iter().map(|r| r.target).collect(),
                    response_type: receiver.spec.response_type,
                    body_size_limit: receiver.spec.body_size_limit,
                })?;
            self.registered_paths
                .lock()
                .insert(receiver.status.webhook_path.clone());
            receiver.mark_ready(
                SERVICE_BACKEND_READY_REASON,
                "receiver successfully registered",
            );
            "ready"
        };

        metrics::gauge!(REGISTERED_RECEIVERS.name).set(self.registered_paths.lock().len() as f64);

        self.cluster.patch_status(key, &receiver.status).await?;

        metrics::histogram!(RECONCILE_DURATION.name, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        Ok(())
    }

    /// Tombstone handling: the resource is gone, so drop its registration
    /// and its index entries.
    fn forget(&self, key: &ObjectKey) {
        self.index.remove(key);

        if let Some(path) = self.assigned_paths.lock().remove(key) {
            tracing::info!(namespace = %key.namespace, name = %key.name, path = %path, "receiver deleted, unregistering");
            if let Err(err) = self.registry.unregister(&path) {
                tracing::error!(error = %err, path = %path, "failed to unregister deleted receiver");
            }
            self.registered_paths.lock().remove(&path);
            metrics::gauge!(REGISTERED_RECEIVERS.name)
                .set(self.registered_paths.lock().len() as f64);
        }
    }

    async fn resolve_targets(
        &self,
        receiver: &ReceiverResource,
    ) -> Result<Vec<ResolvedTarget>, ClusterError> {
        let mut resolved = Vec::new();

        for target in &receiver.spec.targets {
            let namespaces: Vec<String> = match &target.namespace_selector {
                None => vec![receiver.key.namespace.clone()],
                Some(selector) => self
                    .cluster
                    .list_namespaces(selector)
                    .await?
                    .into_iter()
                    .map(|ns| ns.name)
                    .collect(),
            };

            for namespace in namespaces {
                let service_key = ObjectKey {
                    namespace,
                    name: target.service.name.clone(),
                };

                let Some(service) = self.cluster.get_service(&service_key).await? else {
                    tracing::debug!(
                        service = %service_key,
                        reason = SERVICE_NOT_FOUND_REASON,
                        "no service found for target"
                    );
                    continue;
                };

                let Some(port) = select_port(&service, &target.service.port) else {
                    tracing::debug!(
                        service = %service_key,
                        reason = SERVICE_PORT_NOT_FOUND_REASON,
                        "port not found for target"
                    );
                    continue;
                };

                if service.cluster_address.is_empty() {
                    tracing::debug!(service = %service_key, "service has no cluster address");
                    continue;
                }

                resolved.push(ResolvedTarget {
                    reference: service.reference(),
                    target: proxy::registry::Target {
                        path: target.path.clone(),
                        address: service.cluster_address.clone(),
                        port,
                        service_name: service.key.name.clone(),
                        service_namespace: service.key.namespace.clone(),
                    },
                });
            }
        }

        // Deterministic ordering; also the order of the status catalog and
        // of report entries.
        resolved.sort_by(|a, b| {
            a.target
                .service_name
                .cmp(&b.target.service_name)
                .then_with(|| a.target.service_namespace.cmp(&b.target.service_namespace))
        });

        Ok(resolved)
    }

    fn rand_seq(&self, n: usize) -> String {
        let mut rng = self.rng.lock();
        (0..n)
            .map(|_| {
                WEBHOOK_PATH_ALPHABET[rng.random_range(0..WEBHOOK_PATH_ALPHABET.len())] as char
            })
            .collect()
    }
}

struct ResolvedTarget {
    target: proxy::registry::Target,
    reference: ResourceReference,
}

fn select_port(service: &ServiceObject, port_ref: &ServicePortRef) -> Option<u16> {
    let port = match port_ref {
        ServicePortRef::Name(name) => service.ports.iter().find(|p| &p.name == name)?.port,
        ServicePortRef::Number(number) => service.ports.iter().find(|p| p.port == *number)?.port,
    };
    (port != 0).then_some(port)
}
