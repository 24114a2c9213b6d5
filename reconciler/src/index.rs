//! Reverse index from referenced services to receivers.
//!
//! A service change must map to the receivers it affects without scanning
//! every receiver; the index is rebuilt for a receiver on each reconcile and
//! dropped when the receiver is deleted.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::resources::{LabelSelector, ObjectKey, TargetSpec};

/// How one target of a receiver selects the namespaces its service is
/// resolved in.
#[derive(Clone, Debug)]
enum NamespaceRule {
    /// No selector: the receiver's own namespace.
    Own(String),
    /// Selector: every matching namespace.
    Selector(LabelSelector),
}

impl NamespaceRule {
    fn matches(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        match self {
            NamespaceRule::Own(own) => own == namespace,
            NamespaceRule::Selector(selector) => selector.matches(labels),
        }
    }
}

#[derive(Default)]
struct IndexInner {
    /// service name -> receivers referencing it, with the namespace rules of
    /// the referencing targets.
    by_service_name: HashMap<String, HashMap<ObjectKey, Vec<NamespaceRule>>>,
    /// Receivers with at least one selector-bearing target; these are
    /// re-evaluated on namespace changes.
    with_selectors: HashSet<ObjectKey>,
}

#[derive(Default)]
pub struct TargetIndex {
    inner: RwLock<IndexInner>,
}

impl TargetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the index entries of one receiver with its current targets.
    pub fn update(&self, receiver: &ObjectKey, targets: &[TargetSpec]) {
        let mut inner = self.inner.write();

        remove_receiver(&mut inner, receiver);

        let mut uses_selectors = false;
        for target in targets {
            let rule = match &target.namespace_selector {
                None => NamespaceRule::Own(receiver.namespace.clone()),
                Some(selector) => {
                    uses_selectors = true;
                    NamespaceRule::Selector(selector.clone())
                }
            };

            inner
                .by_service_name
                .entry(target.service.name.clone())
                .or_default()
                .entry(receiver.clone())
                .or_default()
                .push(rule);
        }

        if uses_selectors {
            inner.with_selectors.insert(receiver.clone());
        }
    }

    pub fn remove(&self, receiver: &ObjectKey) {
        let mut inner = self.inner.write();
        remove_receiver(&mut inner, receiver);
    }

    /// Receivers affected by a change of the given service, evaluated
    /// against the labels of the service's namespace.
    pub fn affected_by_service(
        &self,
        service: &ObjectKey,
        namespace_labels: &BTreeMap<String, String>,
    ) -> Vec<ObjectKey> {
        let inner = self.inner.read();

        let Some(referencing) = inner.by_service_name.get(&service.name) else {
            return Vec::new();
        };

        let mut keys: Vec<ObjectKey> = referencing
            .iter()
            .filter(|(_, rules)| {
                rules
                    .iter()
                    .any(|rule| rule.matches(&service.namespace, namespace_labels))
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Receivers affected by a namespace change. Label transitions can both
    /// add and drop matches, so every selector-bearing receiver is
    /// re-evaluated.
    pub fn affected_by_namespace(&self) -> Vec<ObjectKey> {
        let inner = self.inner.read();
        let mut keys: Vec<ObjectKey> = inner.with_selectors.iter().cloned().collect();
        keys.sort();
        keys
    }
}

fn remove_receiver(inner: &mut IndexInner, receiver: &ObjectKey) {
    inner.by_service_name.retain(|_, referencing| {
        referencing.remove(receiver);
        !referencing.is_empty()
    });
    inner.with_selectors.remove(receiver);
}
