//! Short-lived pod copying directories in and out of the task volume.

use std::sync::Arc;

use camino::Utf8Path;
use serde::Deserialize;
use serde_json::json;

use crate::common::{ResourceError, Slot, ignore_not_found};
use crate::k8s::Client;

/// Mount point of the task volume in every pod.
pub const VOLUME_PATH: &str = "/directory";

const TRANSFER_IMAGE: &str = "busybox:1.36";

#[derive(Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    Upload,
    Download,
}

/// Pod-backed directory transfer against one claim.
#[derive(Debug)]
pub struct Transfer {
    client: Arc<Client>,
    claim: Slot<String>,
}

impl Transfer {
    /// Binds the transfer to `claim`.
    #[must_use]
    pub const fn new(client: Arc<Client>, claim: Slot<String>) -> Self {
        Self { client, claim }
    }

    fn pod_name(&self) -> String {
        format!("{}-transfer", self.client.name())
    }

    fn manifest(&self, claim: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": self.pod_name(),
                "labels": self.client.labels(),
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "transfer",
                    "image": TRANSFER_IMAGE,
                    "command": ["sleep", "infinity"],
                    "volumeMounts": [{"name": "directory", "mountPath": VOLUME_PATH}],
                }],
                "volumes": [{
                    "name": "directory",
                    "persistentVolumeClaim": {"claimName": claim},
                }],
            },
        })
    }

    async fn wait_running(&self) -> Result<(), ResourceError> {
        let name = self.pod_name();
        self.client
            .backoff()
            .until("transfer pod", || {
                let pod: Result<Pod, ResourceError> =
                    self.client.json("transfer pod", ["get", "pod", name.as_str()]);
                async move {
                    match pod?.status.phase.as_str() {
                        "Running" => Ok(Some(())),
                        phase @ ("Failed" | "Succeeded") => Err(ResourceError::Provider {
                            program: String::from("kubectl"),
                            code: phase.to_owned(),
                            message: String::from("transfer pod exited before copying"),
                        }),
                        _ => Ok(None),
                    }
                }
            })
            .await
    }

    async fn copy(&self, direction: Direction, local: &Utf8Path) -> Result<(), ResourceError> {
        let claim = self.claim.require()?;
        let pod = self.pod_name();
        match self.client.create(&self.manifest(&claim)) {
            Ok(()) | Err(ResourceError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        let remote = format!("{pod}:{VOLUME_PATH}");
        let result = match self.wait_running().await {
            Ok(()) => match direction {
                Direction::Upload => self.client.run([String::from("cp"), format!("{local}/."), remote]),
                Direction::Download => self.client.run([String::from("cp"), remote, local.to_string()]),
            }
            .map(|_| ()),
            Err(err) => Err(err),
        };

        let cleanup = ignore_not_found(
            self.client
                .run(["delete", "pod", pod.as_str(), "--wait=false"])
                .map(|_| ()),
        );
        if let Err(err) = &cleanup {
            tracing::warn!(%pod, error = %err, "failed to remove transfer pod");
        }
        result
    }

    /// Copies the contents of `source` into the volume.
    ///
    /// Exclusion patterns are not applied.
    ///
    /// # Errors
    ///
    /// Returns the provider error of the first failing `kubectl` call.
    pub async fn push(&self, source: &Utf8Path, exclude: &[String]) -> Result<(), ResourceError> {
        if !exclude.is_empty() {
            tracing::warn!(?exclude, "exclusion patterns are ignored on Kubernetes");
        }
        self.copy(Direction::Upload, source).await
    }

    /// Copies the volume into `destination`.
    ///
    /// # Errors
    ///
    /// Returns the provider error of the first failing `kubectl` call.
    pub async fn pull(&self, destination: &Utf8Path) -> Result<(), ResourceError> {
        self.copy(Direction::Download, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::tests::client;
    use crate::test_support::ScriptedRunner;

    fn transfer(runner: &ScriptedRunner) -> Transfer {
        let claim = Slot::new("persistent volume claim");
        claim.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        Transfer::new(Arc::new(client(runner)), claim)
    }

    #[tokio::test]
    async fn push_waits_for_pod_then_copies_and_cleans_up() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_stdout(r#"{"status":{"phase":"Pending"}}"#);
        runner.push_stdout(r#"{"status":{"phase":"Running"}}"#);
        runner.push_success();
        runner.push_success();
        let transfer = transfer(&runner);

        transfer.push(Utf8Path::new("work"), &[]).await.expect("push");

        let commands = runner.commands();
        assert_eq!(
            commands.get(3).map(String::as_str),
            Some("kubectl cp work/. tpi-test-3z4xlzwq-3u0vweb4-transfer:/directory")
        );
        assert_eq!(
            commands.last().map(String::as_str),
            Some("kubectl delete pod tpi-test-3z4xlzwq-3u0vweb4-transfer --wait=false")
        );
    }

    #[tokio::test]
    async fn failed_copy_still_removes_pod() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_stdout(r#"{"status":{"phase":"Running"}}"#);
        runner.push_failure(1, "error: tar: can't open 'directory': Permission denied");
        runner.push_success();
        let transfer = transfer(&runner);

        let result = transfer.pull(Utf8Path::new("out")).await;

        assert!(result.is_err());
        assert_eq!(runner.remaining(), 0);
        assert!(runner
            .commands()
            .last()
            .is_some_and(|command| command.starts_with("kubectl delete pod")));
    }
}
