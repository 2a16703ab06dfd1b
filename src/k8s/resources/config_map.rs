//! Config map holding the task script.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::common::{Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::k8s::Client;

/// Key of the script inside the config map, and its file name once mounted.
pub const SCRIPT_KEY: &str = "script";

#[derive(Deserialize)]
pub(super) struct Object {
    pub(super) metadata: Metadata,
}

#[derive(Deserialize)]
pub(super) struct Metadata {
    pub(super) name: String,
}

/// Script config map named after the identifier.
#[derive(Debug)]
pub struct ConfigMap {
    client: Arc<Client>,
    script: String,
    /// Observed name.
    pub name: Slot<String>,
}

impl ConfigMap {
    /// Creates an unresolved handle for `script`.
    #[must_use]
    pub fn new(client: Arc<Client>, script: &str) -> Self {
        Self {
            client,
            script: script.to_owned(),
            name: Slot::new("config map"),
        }
    }

    fn manifest(&self) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": self.client.name(),
                "labels": self.client.labels(),
            },
            "data": {
                SCRIPT_KEY: self.script,
            },
        })
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let object: Object = self
            .client
            .json("config map", ["get", "configmap", self.client.name()])?;
        self.name.set(object.metadata.name);
        Ok(())
    }
}

impl Resource for ConfigMap {
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
                    .run(["delete", "configmap", self.client.name()])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}
