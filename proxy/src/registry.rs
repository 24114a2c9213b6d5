use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Aggregation policy applied to the responses of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResponseType {
    /// Reply 202 immediately; workers finish in the background.
    #[default]
    Async,
    /// Relay the first 2xx response, or the last received one.
    AwaitAllPreferSuccessful,
    /// Relay the first >=400 response, or the last received one.
    AwaitAllPreferFailed,
    /// Collect every response into a JSON report.
    AwaitAllReport,
}

impl ResponseType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Async => "Async",
            ResponseType::AwaitAllPreferSuccessful => "AwaitAllPreferSuccessful",
            ResponseType::AwaitAllPreferFailed => "AwaitAllPreferFailed",
            ResponseType::AwaitAllReport => "AwaitAllReport",
        }
    }
}

/// One resolved upstream destination of a receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Path applied to the cloned request URL.
    pub path: String,
    /// Resolved endpoint address; never empty inside the table.
    pub address: String,
    /// Resolved endpoint port; never zero inside the table.
    pub port: u16,
    pub service_name: String,
    pub service_namespace: String,
}

impl Target {
    /// `address:port` form used for clone URLs and log fields.
    pub fn host(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A registration table entry, keyed by its webhook path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Receiver {
    pub path: String,
    /// Zero means no deadline.
    pub timeout: Duration,
    pub targets: Vec<Target>,
    pub response_type: ResponseType,
    /// Zero means unlimited.
    pub body_size_limit: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("receiver webhook path may not be empty")]
    EmptyPath,
}

/// The registration table shared between the HTTP handler and the control
/// plane. Writers take the write lock; every dispatch copies the entry out
/// under the read lock, so an in-flight request keeps the entry it started
/// with even if the table changes underneath it.
#[derive(Default)]
pub(crate) struct ReceiverTable {
    entries: RwLock<HashMap<String, Arc<Receiver>>>,
}

impl ReceiverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert keyed by the receiver path.
    pub fn insert(&self, receiver: Receiver) -> Result<(), RegistryError> {
        if receiver.path.is_empty() {
            return Err(RegistryError::EmptyPath);
        }

        let mut entries = self.entries.write();
        entries.insert(receiver.path.clone(), Arc::new(receiver));
        Ok(())
    }

    /// Removes the entry; succeeds whether or not it was present.
    pub fn remove(&self, path: &str) {
        self.entries.write().remove(path);
    }

    pub fn get(&self, path: &str) -> Option<Arc<Receiver>> {
        self.entries.read().get(path).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
