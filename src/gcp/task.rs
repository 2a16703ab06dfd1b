//! GCP task façade sequencing the resources of one task.

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
    Bucket, Credentials, DefaultNetwork, Image, InstanceGroupManager, InstanceTemplate,
    InstanceTemplateInputs, NetworkRule, rule_specs,
};

/// Every resource of one GCP task, wired through their slots.
pub struct GcpTask {
    client: Arc<Client>,
    task: Task,
    timeouts: Timeouts,
    keys: DeterministicKeyPair,
    network: DefaultNetwork,
    image: Image,
    bucket: Bucket,
    credentials: Credentials,
    rules: Vec<NetworkRule>,
    template: InstanceTemplate,
    group: InstanceGroupManager,
}

impl GcpTask {
    /// Wires the resources for `task`, deriving the SSH key from the service
    /// account's private key and the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when the service account key
    /// has no private key and [`ResourceError::Key`] when derivation fails.
    pub fn new(client: Client, task: Task, timeouts: Timeouts) -> Result<Self, ResourceError> {
        let secret = client.credentials.private_key()?;
        let keys = DeterministicKeyPair::new(&secret, client.identifier.long())?;
        Ok(Self::with_keys(client, task, timeouts, keys))
    }

    pub(crate) fn with_keys(
        client: Client,
        task: Task,
        timeouts: Timeouts,
        keys: DeterministicKeyPair,
    ) -> Self {
        let client = Arc::new(client);
        let network = DefaultNetwork::new(Arc::clone(&client));
        let image = Image::new(Arc::clone(&client), &task.environment.image);
        let bucket = Bucket::new(Arc::clone(&client));
        let credentials = Credentials::new(Arc::clone(&client), bucket.name.clone());
        let rules = rule_specs(&client.identifier, &task.firewall)
            .into_iter()
            .map(|spec| NetworkRule::new(Arc::clone(&client), network.name.clone(), spec))
            .collect();
        let template = InstanceTemplate::new(
            Arc::clone(&client),
            InstanceTemplateInputs {
                network: network.name.clone(),
                image: image.state.clone(),
                credentials: credentials.state.clone(),
            },
            task.clone(),
            &keys,
        );
        let group =
            InstanceGroupManager::new(Arc::clone(&client), template.name.clone(), task.parallelism);

        Self {
            client,
            task,
            timeouts,
            keys,
            network,
            image,
            bucket,
            credentials,
            rules,
            template,
            group,
        }
    }

    async fn resolve_storage(&self) -> Result<(), ResourceError> {
        self.bucket.read().await?;
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

impl TaskBackend for GcpTask {
    fn identifier(&self) -> &Identifier {
        &self.client.identifier
    }

    fn key_pair(&self) -> Result<&DeterministicKeyPair, ResourceError> {
        Ok(&self.keys)
    }

    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.create, "task creation", async move {
            let mut steps = vec![
                Step::new("Creating DefaultNetwork...", self.network.create()),
                Step::new("Creating Image...", self.image.create()),
                Step::new("Creating Bucket...", self.bucket.create()),
                Step::new("Creating Credentials...", self.credentials.create()),
            ];
            steps.extend(
                self.rules
                    .iter()
                    .map(|rule| Step::new(format!("Creating {}...", rule.label()), rule.create())),
            );
            steps.push(Step::new(
                "Creating InstanceTemplate...",
                self.template.create(),
            ));
            if let Some(directory) = &self.task.environment.directory {
                steps.push(Step::new(
                    "Uploading Directory...",
                    Box::pin(self.upload(directory, None)),
                ));
            }
            steps.push(Step::new(
                "Creating InstanceGroupManager...",
                self.group.create(),
            ));
            run_steps(steps).await
        }))
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.read, "task read", async move {
            let mut steps = vec![
                Step::new("Reading DefaultNetwork...", self.network.read()),
                Step::new("Reading Image...", self.image.read()),
                Step::new("Reading Bucket...", self.bucket.read()),
                Step::new("Reading Credentials...", self.credentials.read()),
            ];
            steps.extend(
                self.rules
                    .iter()
                    .map(|rule| Step::new(format!("Reading {}...", rule.label()), rule.read())),
            );
            steps.push(Step::new("Reading InstanceTemplate...", self.template.read()));
            steps.push(Step::new(
                "Reading InstanceGroupManager...",
                self.group.read(),
            ));
            run_steps(steps).await
        }))
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.delete, "task deletion", async move {
            if skip_absent(self.resolve_storage().await)? {
                drain(&self.storage().await?, &self.task)?;
            }

            let mut steps = vec![
                Step::new("Deleting InstanceGroupManager...", self.group.delete()),
                Step::new("Deleting InstanceTemplate...", self.template.delete()),
            ];
            steps.extend(
                self.rules
                    .iter()
                    .rev()
                    .map(|rule| Step::new(format!("Deleting {}...", rule.label()), rule.delete())),
            );
            steps.extend([
                Step::new("Deleting Credentials...", self.credentials.delete()),
                Step::new("Deleting Bucket...", self.bucket.delete()),
                Step::new("Deleting Image...", self.image.delete()),
                Step::new("Deleting DefaultNetwork...", self.network.delete()),
            ]);
            run_steps(steps).await
        }))
    }

    fn start(&self) -> ResourceFuture<'_> {
        Box::pin(within(
            self.timeouts.update,
            "task start",
            self.group.resize(self.task.parallelism),
        ))
    }

    fn stop(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.update, "task stop", self.group.resize(0)))
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
            self.group.read().await?;
            let running = self.group.state.get().map_or(0, |state| state.running);
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

    fn events(&self) -> Vec<Event> {
        self.group.state.get().map(|state| state.events).unwrap_or_default()
    }

    fn addresses(&self) -> Vec<String> {
        self.group
            .state
            .get()
            .map(|state| state.addresses)
            .unwrap_or_default()
    }
}
