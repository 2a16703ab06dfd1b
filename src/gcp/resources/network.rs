//! The project's default network, adopted and never deleted.

use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Resource, ResourceError, ResourceFuture, Slot};
use crate::gcp::Client;

const DEFAULT_NETWORK: &str = "default";

#[derive(Deserialize)]
struct Network {
    name: String,
}

/// Default VPC network of the project.
#[derive(Debug)]
pub struct DefaultNetwork {
    client: Arc<Client>,
    /// Observed network name.
    pub name: Slot<String>,
}

impl DefaultNetwork {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            name: Slot::new("default network"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let network: Network = self.client.json(
            "default network",
            ["compute", "networks", "describe", DEFAULT_NETWORK],
        )?;
        self.name.set(network.name);
        Ok(())
    }
}

impl Resource for DefaultNetwork {
    fn create(&self) -> ResourceFuture<'_> {
        self.read()
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.name.clear();
            Ok(())
        })
    }
}
