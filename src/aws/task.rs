//! AWS task façade sequencing the resources of one task.

use std::sync::Arc;

use camino::Utf8Path;

use crate::common::{
    DeterministicKeyPair, Event, Identifier, Resource, ResourceError, ResourceFuture, Status,
    Step, Task, Timeouts, ignore_not_found, run_steps, within,
};
use crate::machine::Storage;
use crate::task::{TaskBackend, drain, skip_absent, storage};

use super::Client;
use super::resources::{
    AutoScalingGroup, Bucket, Credentials, DefaultVpc, DefaultVpcSubnets, Image, KeyPair,
    LaunchTemplate, LaunchTemplateInputs, SecurityGroup,
};

/// Every resource of one AWS task, wired through their slots.
pub struct AwsTask {
    client: Arc<Client>,
    task: Task,
    timeouts: Timeouts,
    keys: DeterministicKeyPair,
    vpc: DefaultVpc,
    subnets: DefaultVpcSubnets,
    image: Image,
    bucket: Bucket,
    credentials: Credentials,
    security_group: SecurityGroup,
    key_pair: KeyPair,
    launch_template: LaunchTemplate,
    group: AutoScalingGroup,
}

impl AwsTask {
    /// Wires the resources for `task`, deriving the SSH key from the secret
    /// access key and the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Key`] when the key cannot be derived.
    pub fn new(client: Client, task: Task, timeouts: Timeouts) -> Result<Self, ResourceError> {
        let keys = DeterministicKeyPair::new(
            &client.credentials.secret_access_key,
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
        let vpc = DefaultVpc::new(Arc::clone(&client));
        let subnets = DefaultVpcSubnets::new(Arc::clone(&client), vpc.id.clone());
        let image = Image::new(Arc::clone(&client), &task.environment.image);
        let bucket = Bucket::new(Arc::clone(&client));
        let credentials = Credentials::new(Arc::clone(&client), bucket.name.clone());
        let security_group =
            SecurityGroup::new(Arc::clone(&client), vpc.id.clone(), task.firewall.clone());
        let key_pair = KeyPair::new(Arc::clone(&client), &keys);
        let launch_template = LaunchTemplate::new(
            Arc::clone(&client),
            LaunchTemplateInputs {
                image: image.state.clone(),
                security_group: security_group.id.clone(),
                key_pair: key_pair.name.clone(),
                credentials: credentials.state.clone(),
            },
            task.clone(),
        );
        let group = AutoScalingGroup::new(
            Arc::clone(&client),
            subnets.ids.clone(),
            launch_template.id.clone(),
            task.parallelism,
            task.spot,
        );

        Self {
            client,
            task,
            timeouts,
            keys,
            vpc,
            subnets,
            image,
            bucket,
            credentials,
            security_group,
            key_pair,
            launch_template,
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

impl TaskBackend for AwsTask {
    fn identifier(&self) -> &Identifier {
        &self.client.identifier
    }

    fn key_pair(&self) -> Result<&DeterministicKeyPair, ResourceError> {
        Ok(&self.keys)
    }

    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.create, "task creation", async move {
            let mut steps = vec![
                Step::new("Creating DefaultVPC...", self.vpc.create()),
                Step::new("Creating DefaultVPCSubnets...", self.subnets.create()),
                Step::new("Creating Image...", self.image.create()),
                Step::new("Creating Bucket...", self.bucket.create()),
                Step::new("Creating Credentials...", self.credentials.create()),
                Step::new("Creating SecurityGroup...", self.security_group.create()),
                Step::new("Creating KeyPair...", self.key_pair.create()),
                Step::new("Creating LaunchTemplate...", self.launch_template.create()),
            ];
            if let Some(directory) = &self.task.environment.directory {
                steps.push(Step::new(
                    "Uploading Directory...",
                    Box::pin(self.upload(directory, None)),
                ));
            }
            steps.push(Step::new(
                "Creating AutoScalingGroup...",
                self.group.create(),
            ));
            run_steps(steps).await
        }))
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.read, "task read", async move {
            run_steps(vec![
                Step::new("Reading DefaultVPC...", self.vpc.read()),
                Step::new("Reading DefaultVPCSubnets...", self.subnets.read()),
                Step::new("Reading Image...", self.image.read()),
                Step::new("Reading Bucket...", self.bucket.read()),
                Step::new("Reading Credentials...", self.credentials.read()),
                Step::new("Reading SecurityGroup...", self.security_group.read()),
                Step::new("Reading KeyPair...", self.key_pair.read()),
                Step::new("Reading LaunchTemplate...", self.launch_template.read()),
                Step::new("Reading AutoScalingGroup...", self.group.read()),
            ])
            .await
        }))
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.delete, "task deletion", async move {
            if skip_absent(self.resolve_storage().await)? {
                drain(&self.storage().await?, &self.task)?;
            }
            ignore_not_found(self.vpc.read().await)?;

            run_steps(vec![
                Step::new("Deleting AutoScalingGroup...", self.group.delete()),
                Step::new("Deleting LaunchTemplate...", self.launch_template.delete()),
                Step::new("Deleting KeyPair...", self.key_pair.delete()),
                Step::new("Deleting SecurityGroup...", self.security_group.delete()),
                Step::new("Deleting Credentials...", self.credentials.delete()),
                Step::new("Deleting Bucket...", self.bucket.delete()),
            ])
            .await
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
