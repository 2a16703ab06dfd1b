//! Provider-agnostic task lifecycle and the dispatcher choosing a backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;

use crate::common::{
    Cloud, DeterministicKeyPair, Event, Identifier, Provider, ResourceError, ResourceFuture, Settings, Status, Task,
};
use crate::exec::CommandRunner;
use crate::machine::Storage;

/// Tag key carrying the long identifier on every cloud object.
pub const IDENTIFIER_TAG: &str = "tpi";

/// Lifecycle of one task on one provider.
///
/// Every operation is bounded by the matching [`crate::common::Timeouts`]
/// entry. Observed state (addresses, events) reflects the last `create`,
/// `read`, or `status` call.
pub trait TaskBackend: Send + Sync {
    /// Identifier naming every cloud object of the task.
    fn identifier(&self) -> &Identifier;

    /// SSH key pair authorised on the machines.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotImplemented`] when the provider gives no
    /// shell access to machines.
    fn key_pair(&self) -> Result<&DeterministicKeyPair, ResourceError>;

    /// Provisions every resource, uploading the input directory before the
    /// machines start.
    fn create(&self) -> ResourceFuture<'_>;

    /// Refreshes every resource from the provider.
    fn read(&self) -> ResourceFuture<'_>;

    /// Pulls results and logs, then removes every resource.
    fn delete(&self) -> ResourceFuture<'_>;

    /// Scales the machines back to the configured parallelism.
    fn start(&self) -> ResourceFuture<'_>;

    /// Scales the machines to zero, keeping everything else.
    fn stop(&self) -> ResourceFuture<'_>;

    /// Uploads `source` into the task storage, optionally limited to the
    /// files matching `include`.
    fn push<'a>(
        &'a self,
        source: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a>;

    /// Downloads task storage into `destination`, optionally limited to the
    /// files matching `include`.
    fn pull<'a>(
        &'a self,
        destination: &'a Utf8Path,
        include: Option<&'a str>,
    ) -> ResourceFuture<'a>;

    /// Running machines plus the folded status reports.
    fn status(&self) -> ResourceFuture<'_, Status>;

    /// Task log bodies ordered by report name.
    fn logs(&self) -> ResourceFuture<'_, Vec<String>>;

    /// Whether any machine reported readiness.
    fn ready(&self) -> ResourceFuture<'_, bool>;

    /// Activity observed by the last refresh.
    fn events(&self) -> Vec<Event>;

    /// Public addresses observed by the last refresh.
    fn addresses(&self) -> Vec<String>;
}

/// Builds the backend selected by `cloud.provider`.
///
/// # Errors
///
/// Returns [`ResourceError::Credentials`] when the credentials do not fit the
/// provider, or [`ResourceError::Key`] when the task key cannot be derived.
pub fn new(
    cloud: &Cloud,
    identifier: Identifier,
    task: Task,
    runner: Arc<dyn CommandRunner>,
    settings: Settings,
) -> Result<Box<dyn TaskBackend>, ResourceError> {
    let tags = tags(cloud, &task, &identifier);
    tracing::debug!(provider = %cloud.provider, identifier = identifier.long(), "selecting backend");
    let backend: Box<dyn TaskBackend> = match cloud.provider {
        Provider::Aws => {
            let client = crate::aws::Client::new(runner, cloud, identifier, tags, settings)?;
            Box::new(crate::aws::AwsTask::new(client, task, cloud.timeouts)?)
        }
        Provider::Azure => {
            let client = crate::az::Client::new(runner, cloud, identifier, tags, settings)?;
            Box::new(crate::az::AzureTask::new(client, task, cloud.timeouts)?)
        }
        Provider::Gcp => {
            let client = crate::gcp::Client::new(runner, cloud, identifier, tags, settings)?;
            Box::new(crate::gcp::GcpTask::new(client, task, cloud.timeouts)?)
        }
        Provider::Kubernetes => {
            let client = crate::k8s::Client::new(runner, cloud, identifier, tags, settings)?;
            Box::new(crate::k8s::KubernetesTask::new(client, task, cloud.timeouts))
        }
    };
    Ok(backend)
}

/// Cloud tags, overridden by task tags, plus the identifier tag.
#[must_use]
pub fn tags(cloud: &Cloud, task: &Task, identifier: &Identifier) -> BTreeMap<String, String> {
    let mut merged = cloud.tags.clone();
    merged.extend(task.tags.clone());
    merged.insert(IDENTIFIER_TAG.to_owned(), identifier.long().to_owned());
    merged
}

/// Storage client for a task remote.
pub(crate) fn storage(
    runner: Arc<dyn CommandRunner>,
    remote: String,
    settings: &Settings,
) -> Storage {
    Storage::new(runner, remote).with_program(settings.programs.rclone.clone())
}

/// Pulls the output directory and surfaces task logs before teardown.
pub(crate) fn drain(storage: &Storage, task: &Task) -> Result<(), ResourceError> {
    if let Some(directory) = task.environment.output_directory() {
        tracing::info!(%directory, "pulling task results");
        storage.pull(directory, None, &task.environment.exclude_list)?;
    }
    for log in storage.logs()? {
        tracing::info!(target: "tpi::task_log", "{log}");
    }
    Ok(())
}

/// Treats an absent prerequisite as nothing to drain.
pub(crate) fn skip_absent(result: Result<(), ResourceError>) -> Result<bool, ResourceError> {
    match result {
        Ok(()) => Ok(true),
        Err(ResourceError::NotFound) => {
            tracing::debug!("storage already gone, skipping drain");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
