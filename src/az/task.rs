//! Azure task façade sequencing the resources of one task.

use std::sync::Arc;

use camino::Utf8Path;

use crate::common::{
    DeterministicKeyPair, Event, Identifier, Resource, ResourceError, ResourceFuture, Status,
    Step, Task, Timeouts, run_steps, within,
};
use crate::machine::Storage;
use crate::task::{TaskBackend, drain, skip_absent, storage};

use super::Client;
use super::resources::{
    BlobContainer, Credentials, ResourceGroup, ScaleSetInputs, SecurityGroup, StorageAccount,
    Subnet, VirtualMachineScaleSet, VirtualNetwork,
};

/// Every resource of one Azure task, wired through their slots.
pub struct AzureTask {
    client: Arc<Client>,
    task: Task,
    timeouts: Timeouts,
    keys: DeterministicKeyPair,
    group: ResourceGroup,
    account: StorageAccount,
    container: BlobContainer,
    credentials: Credentials,
    network: VirtualNetwork,
    security_group: SecurityGroup,
    subnet: Subnet,
    scale_set: VirtualMachineScaleSet,
}

impl AzureTask {
    /// Wires the resources for `task`, deriving the SSH key from the client
    /// secret and the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Key`] when the key cannot be derived.
    pub fn new(client: Client, task: Task, timeouts: Timeouts) -> Result<Self, ResourceError> {
        let keys = DeterministicKeyPair::new(
            &client.credentials.client_secret,
            client.identifier.long(),
        )?;
        Ok(Self::with_keys(client, task, timeouts, keys))
    }

    pub(crate) fn with_keys(
        client: Client,
        task: Task,
        timeouts: Timeouts,
        keys: DeterministicKeyPair,
    ) -> Self {
        let client = Arc::new(client);
        let group = ResourceGroup::new(Arc::clone(&client));
        let account = StorageAccount::new(Arc::clone(&client), group.name.clone());
        let container = BlobContainer::new(Arc::clone(&client), account.state.clone());
        let credentials = Credentials::new(
            Arc::clone(&client),
            account.state.clone(),
            container.name.clone(),
        );
        let network = VirtualNetwork::new(Arc::clone(&client), group.name.clone());
        let security_group =
            SecurityGroup::new(Arc::clone(&client), group.name.clone(), task.firewall.clone());
        let subnet = Subnet::new(
            Arc::clone(&client),
            network.name.clone(),
            security_group.id.clone(),
        );
        let scale_set = VirtualMachineScaleSet::new(
            Arc::clone(&client),
            ScaleSetInputs {
                subnet: subnet.id.clone(),
                credentials: credentials.state.clone(),
            },
            task.clone(),
            &keys,
        );

        Self {
            client,
            task,
            timeouts,
            keys,
            group,
            account,
            container,
            credentials,
            network,
            security_group,
            subnet,
            scale_set,
        }
    }

    async fn resolve_storage(&self) -> Result<(), ResourceError> {
        self.group.read().await?;
        self.account.read().await?;
        self.container.read().await?;
        self.credentials.read().await
    }

    async fn storage(&self) -> Result<Storage, ResourceError> {
        if !self.credentials.state.is_set() {
            self.resolve_storage().await?;
        }
        let state = self.credentials.state.require()?;
        Ok(storage(self.client.runner(), state.remote, &self.client.settings))
    }

    async fn upload(&self, source: &Utf8Path, include: Option<&str>) -> Result<(), ResourceError> {
        self.storage()
            .await?
            .push(source, include, &self.task.environment.exclude_list)
    }
}

impl TaskBackend for AzureTask {
    fn identifier(&self) -> &Identifier {
        &self.client.identifier
    }

    fn key_pair(&self) -> Result<&DeterministicKeyPair, ResourceError> {
        Ok(&self.keys)
    }

    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.create, "task creation", async move {
            let mut steps = vec![
                Step::new("Creating ResourceGroup...", self.group.create()),
                Step::new("Creating StorageAccount...", self.account.create()),
                Step::new("Creating BlobContainer...", self.container.create()),
                Step::new("Creating Credentials...", self.credentials.create()),
                Step::new("Creating VirtualNetwork...", self.network.create()),
                Step::new("Creating SecurityGroup...", self.security_group.create()),
                Step::new("Creating Subnet...", self.subnet.create()),
            ];
            if let Some(directory) = &self.task.environment.directory {
                steps.push(Step::new(
                    "Uploading Directory...",
                    Box::pin(self.upload(directory, None)),
                ));
            }
            steps.push(Step::new(
                "Creating VirtualMachineScaleSet...",
                self.scale_set.create(),
            ));
            run_steps(steps).await
        }))
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.read, "task read", async move {
            run_steps(vec![
                Step::new("Reading ResourceGroup...", self.group.read()),
                Step::new("Reading StorageAccount...", self.account.read()),
                Step::new("Reading BlobContainer...", self.container.read()),
                Step::new("Reading Credentials...", self.credentials.read()),
                Step::new("Reading VirtualNetwork...", self.network.read()),
                Step::new("Reading SecurityGroup...", self.security_group.read()),
                Step::new("Reading Subnet...", self.subnet.read()),
                Step::new("Reading VirtualMachineScaleSet...", self.scale_set.read()),
            ])
            .await
        }))
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.delete, "task deletion", async move {
            if skip_absent(self.resolve_storage().await)? {
                drain(&self.storage().await?, &self.task)?;
            }

            run_steps(vec![
                Step::new("Deleting VirtualMachineScaleSet...", self.scale_set.delete()),
                Step::new("Deleting Subnet...", self.subnet.delete()),
                Step::new("Deleting SecurityGroup...", self.security_group.delete()),
                Step::new("Deleting VirtualNetwork...", self.network.delete()),
                Step::new("Deleting BlobContainer...", self.container.delete()),
                Step::new("Deleting Credentials...", self.credentials.delete()),
                Step::new("Deleting StorageAccount...", self.account.delete()),
                Step::new("Deleting ResourceGroup...", self.group.delete()),
            ])
            .await
        }))
    }

    fn start(&self) -> ResourceFuture<'_> {
        Box::pin(within(
            self.timeouts.update,
            "task start",
            self.scale_set.resize(self.task.parallelism),
        ))
    }

    fn stop(&self) -> ResourceFuture<'_> {
        Box::pin(within(
            self.timeouts.update,
            "task stop",
            self.scale_set.resize(0),
        ))
    }

    fn push<'a>(
        &'a self,
        source: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a> {
        Box::pin(within(
            self.timeouts.create,
            "directory upload",
            self.upload(source, include),
        ))
    }

    fn pull<'a>(
        &'a self,
        destination: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a> {
        Box::pin(within(self.timeouts.read, "directory download", async move {
            self.storage()
                .await?
                .pull(destination, include, &self.task.environment.exclude_list)
        }))
    }

    fn status(&self) -> ResourceFuture<'_, Status> {
        Box::pin(within(self.timeouts.read, "task status", async move {
            self.scale_set.read().await?;
            let running = self.scale_set.state.get().map_or(0, |state| state.running);
            self.storage().await?.status(Status {
                running,
                ..Status::default()
            })
        }))
    }

    fn logs(&self) -> ResourceFuture<'_, Vec<String>> {
        Box::pin(within(self.timeouts.read, "task logs", async move {
            self.storage().await?.logs()
        }))
    }

    fn ready(&self) -> ResourceFuture<'_, bool> {
        Box::pin(within(self.timeouts.read, "task readiness", async move {
            self.storage().await?.ready()
        }))
    }

    // Scale sets expose no activity feed through the CLI.
    fn events(&self) -> Vec<Event> {
        Vec::new()
    }

    fn addresses(&self) -> Vec<String> {
        self.scale_set
            .state
            .get()
            .map(|state| state.addresses)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::az::tests::{client, push_login};
    use crate::test_support::ScriptedRunner;

    fn task(runner: &ScriptedRunner) -> AzureTask {
        let keys = DeterministicKeyPair::with_bits("secret", "tpi-test-3z4xlzwq-3u0vweb4", 1024)
            .expect("key should derive");
        AzureTask::with_keys(client(runner), Task::default(), Timeouts::default(), keys)
    }

    #[tokio::test]
    async fn delete_of_a_missing_task_skips_drain() {
        let runner = ScriptedRunner::new();
        push_login(&runner);
        runner.push_failure(3, "ERROR: (ResourceGroupNotFound) Resource group 'x' could not be found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (NotFound) Subnet not found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (StorageAccountNotFound) The storage account was not found.");
        runner.push_failure(3, "ERROR: (ResourceGroupNotFound) Resource group 'x' could not be found.");
        let task = task(&runner);

        assert_eq!(task.delete().await, Ok(()));

        assert_eq!(runner.remaining(), 0);
        let commands = runner.commands();
        assert!(commands.last().is_some_and(|command| command.starts_with("az group delete")));
        assert!(!commands.iter().any(|command| command.contains("storage container")));
    }

    #[tokio::test]
    async fn delete_proceeds_when_nothing_was_uploaded() {
        let runner = ScriptedRunner::new();
        push_login(&runner);
        runner.push_stdout(r#"{"name":"tpi-test-3z4xlzwq-3u0vweb4"}"#);
        runner.push_stdout(r#"[{"keyName":"key1","value":"primary"}]"#);
        runner.push_stdout(r#"{"name":"tpi-test-3z4xlzwq-3u0vweb4"}"#);
        runner.push_failure(3, "ERROR : : error reading source root directory: directory not found");
        runner.push_failure(3, "ERROR : : error listing: directory not found");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (NotFound) Subnet not found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (ResourceNotFound) The Resource was not found.");
        runner.push_failure(3, "ERROR: (StorageAccountNotFound) The storage account was not found.");
        runner.push_failure(3, "ERROR: (ResourceGroupNotFound) Resource group 'x' could not be found.");
        let keys = DeterministicKeyPair::with_bits("secret", "tpi-test-3z4xlzwq-3u0vweb4", 1024)
            .expect("key should derive");
        let task = AzureTask::with_keys(
            client(&runner),
            Task {
                environment: crate::common::Environment {
                    directory: Some(camino::Utf8PathBuf::from("work")),
                    ..crate::common::Environment::default()
                },
                ..Task::default()
            },
            Timeouts::default(),
            keys,
        );

        assert_eq!(task.delete().await, Ok(()));

        assert_eq!(runner.remaining(), 0);
        let commands = runner.commands();
        assert!(commands.iter().any(|command| command.starts_with("rclone copy")));
        assert!(commands.last().is_some_and(|command| command.starts_with("az group delete")));
    }

    #[tokio::test]
    async fn stop_scales_to_zero() {
        let runner = ScriptedRunner::new();
        push_login(&runner);
        runner.push_success();
        runner.push_stdout(r#"{"sku":{"capacity":0}}"#);
        runner.push_stdout("[]");
        runner.push_stdout("[]");
        let task = task(&runner);

        task.stop().await.expect("stop");

        assert!(runner
            .commands()
            .iter()
            .any(|command| command.contains("vmss scale") && command.contains("--new-capacity 0")));
        assert!(task.addresses().is_empty());
    }

    #[tokio::test]
    async fn create_stops_before_dependents_when_group_fails() {
        let runner = ScriptedRunner::new();
        push_login(&runner);
        runner.push_failure(1, "ERROR: (AuthorizationFailed) The client does not have authorization.");
        let task = task(&runner);

        let result = task.create().await;

        assert!(matches!(result, Err(ResourceError::Provider { ref code, .. }) if code == "AuthorizationFailed"));
        assert_eq!(runner.commands().len(), 3);
    }
}
