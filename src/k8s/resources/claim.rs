//! Persistent volume claim standing in for object storage.

use std::sync::Arc;

use serde_json::json;

use crate::common::{Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::k8s::Client;

use super::config_map::Object;

/// Size requested when the task sets none.
pub const DEFAULT_STORAGE_GB: u32 = 1;

/// Claim named after the identifier, mounted by every pod of the task.
#[derive(Debug)]
pub struct PersistentVolumeClaim {
    client: Arc<Client>,
    storage_gb: u32,
    shared: bool,
    /// Observed name.
    pub name: Slot<String>,
}

impl PersistentVolumeClaim {
    /// Creates an unresolved handle; claims shared by several pods request
    /// `ReadWriteMany` access.
    #[must_use]
    pub fn new(client: Arc<Client>, storage_gb: Option<u32>, parallelism: u16) -> Self {
        Self {
            client,
            storage_gb: storage_gb.unwrap_or(DEFAULT_STORAGE_GB),
            shared: parallelism > 1,
            name: Slot::new("persistent volume claim"),
        }
    }

    fn manifest(&self) -> serde_json::Value {
        let access_mode = if self.shared {
            "ReadWriteMany"
        } else {
            "ReadWriteOnce"
        };
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": self.client.name(),
                "labels": self.client.labels(),
            },
            "spec": {
                "accessModes": [access_mode],
                "resources": {
                    "requests": {
                        "storage": format!("{}Gi", self.storage_gb),
                    },
                },
            },
        })
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let object: Object = self.client.json(
            "persistent volume claim",
            ["get", "persistentvolumeclaim", self.client.name()],
        )?;
        self.name.set(object.metadata.name);
        Ok(())
    }
}

impl Resource for PersistentVolumeClaim {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.client.create(&self.manifest()) {
                Ok(()) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            ignore_not_found(
                self.client
                    .run(["delete", "persistentvolumeclaim", self.client.name()])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}
