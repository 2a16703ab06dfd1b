//! Resource group containing every object of the task.

use std::sync::Arc;

use serde::Deserialize;

use crate::az::Client;
use crate::common::{Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};

#[derive(Deserialize)]
struct Group {
    name: String,
}

/// Resource group named after the identifier.
#[derive(Debug)]
pub struct ResourceGroup {
    client: Arc<Client>,
    /// Observed group name.
    pub name: Slot<String>,
}

impl ResourceGroup {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            name: Slot::new("resource group"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let group: Group = self
            .client
            .json("resource group", ["group", "show", "--name", self.client.group()])?;
        self.name.set(group.name);
        Ok(())
    }
}

impl Resource for ResourceGroup {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let mut args = vec![
                String::from("group"),
                String::from("create"),
                String::from("--name"),
                self.client.group().to_owned(),
                String::from("--location"),
                self.client.location.clone(),
            ];
            args.extend(self.client.tag_args());
            match self.client.run(args) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
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
                    .run(["group", "delete", "--name", self.client.group(), "--yes"])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}
