//! Storage account, blob container, and the credentials machines use to
//! reach them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::az::Client;
use crate::common::{Provider, Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::machine::{RcloneConnection, task_variables};

#[derive(Deserialize)]
struct AccountKey {
    value: String,
}

#[derive(Deserialize)]
struct Container {
    name: String,
}

#[derive(Deserialize)]
struct Created {
    #[serde(default)]
    created: bool,
}

/// Storage account name and its primary key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountState {
    /// Account name.
    pub name: String,
    /// Primary access key.
    pub key: String,
}

/// Storage account named after the short identifier.
#[derive(Debug)]
pub struct StorageAccount {
    client: Arc<Client>,
    group: Slot<String>,
    /// Observed account and key.
    pub state: Slot<AccountState>,
}

impl StorageAccount {
    /// Creates an unresolved handle inside `group`.
    #[must_use]
    pub fn new(client: Arc<Client>, group: Slot<String>) -> Self {
        Self {
            client,
            group,
            state: Slot::new("storage account"),
        }
    }

    fn account_name(&self) -> String {
        self.client.identifier.short()
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let group = self.group.require()?;
        let name = self.account_name();
        let keys: Vec<AccountKey> = self.client.json(
            "storage account keys",
            [
                "storage",
                "account",
                "keys",
                "list",
                "--account-name",
                name.as_str(),
                "--resource-group",
                group.as_str(),
            ],
        )?;
        let key = keys.into_iter().next().ok_or(ResourceError::NotFound)?;
        self.state.set(AccountState {
            name,
            key: key.value,
        });
        Ok(())
    }
}

impl Resource for StorageAccount {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let group = self.group.require()?;
            let mut args = vec![
                String::from("storage"),
                String::from("account"),
                String::from("create"),
                String::from("--name"),
                self.account_name(),
                String::from("--resource-group"),
                group,
                String::from("--location"),
                self.client.location.clone(),
                String::from("--sku"),
                String::from("Standard_LRS"),
                String::from("--kind"),
                String::from("StorageV2"),
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
            let group = self.client.group();
            let name = self.account_name();
            ignore_not_found(
                self.client
                    .run([
                        "storage",
                        "account",
                        "delete",
                        "--name",
                        name.as_str(),
                        "--resource-group",
                        group,
                        "--yes",
                    ])
                    .map(|_| ()),
            )?;
            self.state.clear();
            Ok(())
        })
    }
}

/// Blob container named after the identifier.
#[derive(Debug)]
pub struct BlobContainer {
    client: Arc<Client>,
    account: Slot<AccountState>,
    /// Observed container name.
    pub name: Slot<String>,
}

impl BlobContainer {
    /// Creates an unresolved handle inside `account`.
    #[must_use]
    pub fn new(client: Arc<Client>, account: Slot<AccountState>) -> Self {
        Self {
            client,
            account,
            name: Slot::new("blob container"),
        }
    }

    fn container_args(&self, action: &str) -> Result<Vec<String>, ResourceError> {
        let account = self.account.require()?;
        Ok(vec![
            String::from("storage"),
            String::from("container"),
            action.to_owned(),
            String::from("--name"),
            self.client.identifier.long().to_owned(),
            String::from("--account-name"),
            account.name,
            String::from("--account-key"),
            account.key,
        ])
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let container: Container = self
            .client
            .json("blob container", self.container_args("show")?)?;
        self.name.set(container.name);
        Ok(())
    }
}

impl Resource for BlobContainer {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let result: Result<Created, ResourceError> = self
                .client
                .json("blob container", self.container_args("create")?);
            match result {
                Ok(created) => {
                    if !created.created {
                        tracing::debug!("blob container already present");
                    }
                    self.lookup()
                }
                Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.container_args("delete") {
                Ok(args) => ignore_not_found(self.client.run(args).map(|_| ()))?,
                // Without an account there is no container left to delete.
                Err(ResourceError::Unresolved(_)) => {}
                Err(err) => return Err(err),
            }
            self.name.clear();
            Ok(())
        })
    }
}

/// Storage connection and provider variables handed to machines.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialsState {
    /// rclone remote of the task container.
    pub remote: String,
    /// Variables exported on every machine.
    pub variables: BTreeMap<String, String>,
}

/// Derived credentials; no cloud object backs them.
#[derive(Debug)]
pub struct Credentials {
    client: Arc<Client>,
    account: Slot<AccountState>,
    container: Slot<String>,
    /// Observed connection and variables.
    pub state: Slot<CredentialsState>,
}

impl Credentials {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>, account: Slot<AccountState>, container: Slot<String>) -> Self {
        Self {
            client,
            account,
            container,
            state: Slot::new("credentials"),
        }
    }

    fn resolve(&self) -> Result<(), ResourceError> {
        let account = self.account.require()?;
        let container = self.container.require()?;
        let principal = &self.client.credentials;

        let remote = RcloneConnection {
            backend: String::from("azureblob"),
            container,
            path: String::new(),
            config: BTreeMap::from([
                (String::from("account"), account.name),
                (String::from("key"), account.key),
            ]),
        }
        .to_string();

        let mut variables = task_variables(
            Provider::Azure,
            &self.client.location,
            &self.client.identifier,
            &remote,
        );
        variables.extend([
            (String::from("AZURE_CLIENT_ID"), principal.client_id.clone()),
            (
                String::from("AZURE_CLIENT_SECRET"),
                principal.client_secret.clone(),
            ),
            (
                String::from("AZURE_SUBSCRIPTION_ID"),
                principal.subscription_id.clone(),
            ),
            (String::from("AZURE_TENANT_ID"), principal.tenant_id.clone()),
        ]);

        self.state.set(CredentialsState { remote, variables });
        Ok(())
    }
}

impl Resource for Credentials {
    fn create(&self) -> ResourceFuture<'_> {
        self.read()
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.resolve() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.state.clear();
            Ok(())
        })
    }
}
