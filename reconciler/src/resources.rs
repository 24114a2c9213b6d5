//! The declarative resource model consumed by the reconciler.
//!
//! Receivers bind an HTTP path to a set of upstream targets and an
//! aggregation policy; services and namespaces are the world objects the
//! control plane publishes for target resolution.

use proxy::registry::ResponseType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const READY_CONDITION: &str = "Ready";
pub const SERVICE_BACKEND_READY_REASON: &str = "ServiceBackendReady";
pub const SERVICE_PORT_NOT_FOUND_REASON: &str = "ServicePortNotFound";
pub const SERVICE_NOT_FOUND_REASON: &str = "ServiceNotFound";

/// Namespace/name pair identifying an object in the control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A receiver resource as delivered by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReceiverResource {
    pub key: ObjectKey,
    /// Monotonic counter bumped by the control plane on every spec change.
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub spec: ReceiverSpec,
    #[serde(default)]
    pub status: ReceiverStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverSpec {
    /// When true, reconciliation is a no-op.
    pub suspend: bool,

    pub response_type: ResponseType,

    /// Zero means unlimited.
    pub body_size_limit: u64,

    /// Deadline for the target requests; zero means none.
    pub timeout_seconds: u64,

    pub targets: Vec<TargetSpec>,
}

impl Default for ReceiverSpec {
    fn default() -> Self {
        Self {
            suspend: false,
            response_type: ResponseType::default(),
            body_size_limit: 0,
            timeout_seconds: default_timeout_seconds(),
            targets: Vec::new(),
        }
    }
}

impl ReceiverSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Path applied to the cloned request URL.
    #[serde(default = "default_target_path")]
    pub path: String,

    pub service: ServiceRef,

    /// When absent, the service is resolved in the receiver's own namespace;
    /// when present, in every namespace matching the selector, each match
    /// producing one target.
    #[serde(default)]
    pub namespace_selector: Option<LabelSelector>,
}

fn default_target_path() -> String {
    "/".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceRef {
    pub name: String,
    pub port: ServicePortRef,
}

/// Port reference; exactly one of the two forms.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePortRef {
    Name(String),
    Number(u16),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// An empty selector matches every label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverStatus {
    pub observed_generation: i64,

    /// Assigned on first reconcile and stable for the receiver's lifetime.
    pub webhook_path: String,

    /// Resolved service references, deterministically sorted.
    pub sub_resource_catalog: Vec<ResourceReference>,

    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub api_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
}

impl ReceiverResource {
    /// Upserts the Ready condition by type.
    fn set_ready(&mut self, status: bool, reason: &str, message: &str) {
        let condition = Condition {
            r#type: READY_CONDITION.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: self.generation,
        };

        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.r#type == READY_CONDITION)
        {
            Some(existing) => *existing = condition,
            None => self.status.conditions.push(condition),
        }
    }

    pub fn mark_ready(&mut self, reason: &str, message: &str) {
        self.set_ready(true, reason, message);
    }

    pub fn mark_not_ready(&mut self, reason: &str, message: &str) {
        self.set_ready(false, reason, message);
    }

    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.r#type == READY_CONDITION)
    }
}

/// A service object as published by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceObject {
    pub key: ObjectKey,
    /// Empty when the service has no routable address yet.
    #[serde(default)]
    pub cluster_address: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

impl ServiceObject {
    pub fn reference(&self) -> ResourceReference {
        ResourceReference {
            kind: "Service".to_string(),
            name: self.key.name.clone(),
            namespace: self.key.namespace.clone(),
            api_version: "v1".to_string(),
        }
    }
}

/// A namespace object as published by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NamespaceObject {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec: ReceiverSpec = serde_yaml::from_str("{}").unwrap();
        assert!(!spec.suspend);
        assert_eq!(spec.response_type, ResponseType::Async);
        assert_eq!(spec.body_size_limit, 0);
        assert_eq!(spec.timeout(), Duration::from_secs(10));
        assert!(spec.targets.is_empty());
    }

    #[test]
    fn target_spec_port_forms() {
        let by_name: TargetSpec =
            serde_yaml::from_str("service: {name: svc, port: {name: http}}").unwrap();
        assert_eq!(by_name.path, "/");
        assert_eq!(
            by_name.service.port,
            ServicePortRef::Name("http".to_string())
        );

        let by_number: TargetSpec =
            serde_yaml::from_str("service: {name: svc, port: {number: 8080}}").unwrap();
        assert_eq!(by_number.service.port, ServicePortRef::Number(8080));
    }

    #[test]
    fn unknown_response_type_is_rejected() {
        let result: Result<ReceiverSpec, _> = serde_yaml::from_str("responseType: AwaitSome");
        assert!(result.is_err());
    }

    #[test]
    fn selector_matching() {
        let selector: LabelSelector =
            serde_yaml::from_str("matchLabels: {team: backend}").unwrap();

        let mut labels = BTreeMap::new();
        assert!(!selector.matches(&labels));

        labels.insert("team".to_string(), "backend".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        assert!(selector.matches(&labels));

        let empty = LabelSelector::default();
        assert!(empty.matches(&BTreeMap::new()));
        assert!(empty.matches(&labels));
    }

    #[test]
    fn ready_condition_is_upserted_by_type() {
        let mut receiver = ReceiverResource {
            key: ObjectKey::new("default", "test"),
            generation: 2,
            ..ReceiverResource::default()
        };

        receiver.mark_not_ready(SERVICE_BACKEND_READY_REASON, "no targets found");
        receiver.mark_ready(SERVICE_BACKEND_READY_REASON, "receiver successfully registered");

        assert_eq!(receiver.status.conditions.len(), 1);
        let condition = receiver.ready_condition().unwrap();
        assert!(condition.status);
        assert_eq!(condition.reason, SERVICE_BACKEND_READY_REASON);
        assert_eq!(condition.message, "receiver successfully registered");
        assert_eq!(condition.observed_generation, 2);
    }
}
