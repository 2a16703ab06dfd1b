//! Kubernetes task façade sequencing the objects of one task.

use std::sync::Arc;

use camino::Utf8Path;

use crate::common::{
    DeterministicKeyPair, Event, Identifier, Resource, ResourceError, ResourceFuture, Status,
    Step, Task, Timeouts, run_steps, within,
};
use crate::machine::is_ready;
use crate::task::{TaskBackend, skip_absent};

use super::Client;
use super::resources::{ConfigMap, Job, JobInputs, PersistentVolumeClaim, Transfer};

/// Every object of one Kubernetes task.
///
/// Jobs cannot be paused, so `start` and `stop` are not implemented.
pub struct KubernetesTask {
    client: Arc<Client>,
    task: Task,
    timeouts: Timeouts,
    config_map: ConfigMap,
    claim: PersistentVolumeClaim,
    transfer: Transfer,
    job: Job,
}

impl KubernetesTask {
    /// Wires the objects for `task`.
    #[must_use]
    pub fn new(client: Client, task: Task, timeouts: Timeouts) -> Self {
        let client = Arc::new(client);
        let config_map = ConfigMap::new(Arc::clone(&client), &task.environment.script);
        let claim = PersistentVolumeClaim::new(
            Arc::clone(&client),
            task.size.storage_gb,
            task.parallelism,
        );
        let transfer = Transfer::new(Arc::clone(&client), claim.name.clone());
        let job = Job::new(
            Arc::clone(&client),
            JobInputs {
                config_map: config_map.name.clone(),
                claim: claim.name.clone(),
            },
            task.clone(),
        );

        Self {
            client,
            task,
            timeouts,
            config_map,
            claim,
            transfer,
            job,
        }
    }

    async fn upload(&self, source: &Utf8Path) -> Result<(), ResourceError> {
        if !self.claim.name.is_set() {
            self.claim.read().await?;
        }
        self.transfer
            .push(source, &self.task.environment.exclude_list)
            .await
    }

    async fn download(&self, destination: &Utf8Path) -> Result<(), ResourceError> {
        if !self.claim.name.is_set() {
            self.claim.read().await?;
        }
        self.transfer.pull(destination).await
    }

    /// Surfaces pod output, then removes the job so the volume is released.
    async fn drain_job(&self) -> Result<(), ResourceError> {
        if skip_absent(self.job.read().await)? {
            for log in self.job.logs()? {
                tracing::info!(target: "tpi::task_log", "{log}");
            }
        }
        self.job.delete().await
    }

    async fn drain_volume(&self) -> Result<(), ResourceError> {
        let Some(directory) = self.task.environment.output_directory() else {
            return Ok(());
        };
        if skip_absent(self.claim.read().await)? {
            tracing::info!(%directory, "pulling task results");
            self.transfer.pull(directory).await?;
        }
        Ok(())
    }
}

impl TaskBackend for KubernetesTask {
    fn identifier(&self) -> &Identifier {
        &self.client.identifier
    }

    fn key_pair(&self) -> Result<&DeterministicKeyPair, ResourceError> {
        Err(ResourceError::NotImplemented)
    }

    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.create, "task creation", async move {
            let mut steps = vec![
                Step::new("Creating ConfigMap...", self.config_map.create()),
                Step::new("Creating PersistentVolumeClaim...", self.claim.create()),
            ];
            if let Some(directory) = &self.task.environment.directory {
                steps.push(Step::new(
                    "Uploading Directory...",
                    Box::pin(self.upload(directory)),
                ));
            }
            steps.push(Step::new("Creating Job...", self.job.create()));
            run_steps(steps).await
        }))
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.read, "task read", async move {
            run_steps(vec![
                Step::new("Reading ConfigMap...", self.config_map.read()),
                Step::new("Reading PersistentVolumeClaim...", self.claim.read()),
                Step::new("Reading Job...", self.job.read()),
            ])
            .await
        }))
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(within(self.timeouts.delete, "task deletion", async move {
            run_steps(vec![
                Step::new("Deleting Job...", Box::pin(self.drain_job())),
                Step::new("Downloading Directory...", Box::pin(self.drain_volume())),
                Step::new("Deleting PersistentVolumeClaim...", self.claim.delete()),
                Step::new("Deleting ConfigMap...", self.config_map.delete()),
            ])
            .await
        }))
    }

    fn start(&self) -> ResourceFuture<'_> {
        Box::pin(async { Err(ResourceError::NotImplemented) })
    }

    fn stop(&self) -> ResourceFuture<'_> {
        Box::pin(async { Err(ResourceError::NotImplemented) })
    }

    fn push<'a>(
        &'a self,
        source: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a> {
        if let Some(pattern) = include {
            tracing::warn!(pattern, "include filters are ignored on Kubernetes");
        }
        Box::pin(within(self.timeouts.create, "directory upload", self.upload(source)))
    }

    fn pull<'a>(
        &'a self,
        destination: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a> {
        if let Some(pattern) = include {
            tracing::warn!(pattern, "include filters are ignored on Kubernetes");
        }
        Box::pin(within(
            self.timeouts.read,
            "directory download",
            self.download(destination),
        ))
    }

    fn status(&self) -> ResourceFuture<'_, Status> {
        Box::pin(within(self.timeouts.read, "task status", async move {
            self.job.read().await?;
            let state = self.job.state.require()?;
            Ok(Status {
                running: state.active,
                succeeded: state.succeeded,
                failed: state.failed,
            })
        }))
    }

    fn logs(&self) -> ResourceFuture<'_, Vec<String>> {
        Box::pin(within(self.timeouts.read, "task logs", async move {
            self.job.logs()
        }))
    }

    fn ready(&self) -> ResourceFuture<'_, bool> {
        Box::pin(within(self.timeouts.read, "task readiness", async move {
            Ok(self.job.logs()?.iter().any(|log| is_ready(log)))
        }))
    }

    fn events(&self) -> Vec<Event> {
        self.job.state.get().map(|state| state.events).unwrap_or_default()
    }

    fn addresses(&self) -> Vec<String> {
        self.job
            .state
            .get()
            .map(|state| state.addresses)
            .unwrap_or_default()
    }
}
