//! Job running the task script: the scaling primitive of the Kubernetes
//! backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::common::{
    Event, Provider, Resource, ResourceError, ResourceFuture, Slot, SpotPolicy, Task,
    ignore_not_found, split_image,
};
use crate::k8s::Client;
use crate::machine::{machine_environment, task_variables};

use super::config_map::SCRIPT_KEY;
use super::transfer::VOLUME_PATH;

const SCRIPT_PATH: &str = "/script";

/// CPU, memory and accelerator requested by each pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodResources {
    /// CPU quantity.
    pub cpu: String,
    /// Memory quantity.
    pub memory: String,
    /// Accelerator node label value and GPU count.
    pub accelerator: Option<(String, u16)>,
}

impl PodResources {
    /// Parses `cpu-memory[+accelerator[*count]]`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Invalid`] for any other shape.
    pub fn parse(value: &str) -> Result<Self, ResourceError> {
        let invalid = || ResourceError::invalid("machine", format!("{value} is not of the form cpu-memory[+accelerator*count]"));
        let (base, accelerator) = match value.split_once('+') {
            Some((base, accelerator)) => (base, Some(accelerator)),
            None => (value, None),
        };
        let (cpu, memory) = base.split_once('-').ok_or_else(invalid)?;
        let accelerator = accelerator
            .map(|spec| match spec.split_once('*') {
                Some((kind, count)) => count
                    .parse()
                    .map(|parsed| (kind.to_owned(), parsed))
                    .map_err(|_| invalid()),
                None => Ok((spec.to_owned(), 1)),
            })
            .transpose()?;
        Ok(Self {
            cpu: cpu.to_owned(),
            memory: memory.to_owned(),
            accelerator,
        })
    }
}

#[derive(Deserialize)]
struct JobObject {
    #[serde(default)]
    spec: JobSpec,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Default, Deserialize)]
struct JobSpec {
    #[serde(default)]
    parallelism: u32,
}

#[derive(Default, Deserialize)]
struct JobStatus {
    #[serde(default)]
    active: u32,
    #[serde(default)]
    succeeded: u32,
    #[serde(default)]
    failed: u32,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct List<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct PodObject {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Default, Deserialize)]
struct PodStatus {
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventObject {
    last_timestamp: Option<String>,
    event_time: Option<String>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Observed state of the job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobState {
    /// Requested pod count.
    pub desired: u32,
    /// Pods currently running.
    pub active: u32,
    /// Pods that exited with code `0`.
    pub succeeded: u32,
    /// Pods that failed.
    pub failed: u32,
    /// Pod addresses.
    pub addresses: Vec<String>,
    /// Events recorded against the job.
    pub events: Vec<Event>,
}

/// Prerequisites consumed by [`Job`].
#[derive(Clone, Debug)]
pub struct JobInputs {
    /// Config map holding the script.
    pub config_map: Slot<String>,
    /// Claim mounted as the working directory.
    pub claim: Slot<String>,
}

/// Job named after the identifier.
#[derive(Debug)]
pub struct Job {
    client: Arc<Client>,
    inputs: JobInputs,
    task: Task,
    /// Observed state.
    pub state: Slot<JobState>,
}

impl Job {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>, inputs: JobInputs, task: Task) -> Self {
        Self {
            client,
            inputs,
            task,
            state: Slot::new("job"),
        }
    }

    fn environment(&self) -> serde_json::Value {
        let mut provider = task_variables(
            Provider::Kubernetes,
            &self.client.region,
            &self.client.identifier,
            "",
        );
        provider.remove("RCLONE_REMOTE");
        machine_environment(&self.task.environment.variables, provider)
            .into_iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect()
    }

    fn manifest(&self) -> Result<serde_json::Value, ResourceError> {
        let config_map = self.inputs.config_map.require()?;
        let claim = self.inputs.claim.require()?;
        let resources = PodResources::parse(&crate::k8s::machine(&self.task.size.machine))?;
        let reference = crate::k8s::image(&self.task.environment.image);
        let (_, image) = split_image(&reference);
        if self.task.spot.policy() != SpotPolicy::OnDemand {
            tracing::warn!("spot pricing is not available on Kubernetes, ignoring");
        }

        let mut limits = serde_json::Map::from_iter([
            (String::from("cpu"), json!(resources.cpu)),
            (String::from("memory"), json!(resources.memory)),
        ]);
        let mut node_selector = serde_json::Map::new();
        if let Some((kind, count)) = resources.accelerator {
            limits.insert(String::from("nvidia.com/gpu"), json!(count));
            node_selector.insert(String::from("accelerator"), json!(kind));
        }
        let parallelism = self.task.parallelism;

        Ok(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.client.name(),
                "labels": self.client.labels(),
            },
            "spec": {
                "parallelism": parallelism,
                "completions": parallelism,
                "backoffLimit": 0,
                "activeDeadlineSeconds": self.task.environment.timeout.as_secs(),
                "template": {
                    "metadata": {"labels": self.client.labels()},
                    "spec": {
                        "restartPolicy": "Never",
                        "nodeSelector": node_selector,
                        "containers": [{
                            "name": "task",
                            "image": image,
                            "command": ["/bin/sh", format!("{SCRIPT_PATH}/{SCRIPT_KEY}")],
                            "workingDir": VOLUME_PATH,
                            "env": self.environment(),
                            "resources": {"limits": limits},
                            "volumeMounts": [
                                {"name": "script", "mountPath": SCRIPT_PATH},
                                {"name": "directory", "mountPath": VOLUME_PATH},
                            ],
                        }],
                        "volumes": [
                            {"name": "script", "configMap": {"name": config_map, "defaultMode": 0o755}},
                            {"name": "directory", "persistentVolumeClaim": {"claimName": claim}},
                        ],
                    },
                },
            },
        }))
    }

    fn pods(&self) -> Result<Vec<PodObject>, ResourceError> {
        let selector = format!("--selector=job-name={}", self.client.name());
        let mut pods: List<PodObject> = self.client.json("pods", ["get", "pods", selector.as_str()])?;
        pods.items.sort_by(|left, right| left.metadata.name.cmp(&right.metadata.name));
        Ok(pods.items)
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.client.name();
        let job: JobObject = self.client.json("job", ["get", "job", name])?;
        let addresses = self
            .pods()?
            .into_iter()
            .filter_map(|pod| pod.status.pod_ip)
            .collect();

        let selector = format!("--field-selector=involvedObject.name={name}");
        let recorded: List<EventObject> =
            self.client.json("events", ["get", "events", selector.as_str()])?;
        let events = recorded
            .items
            .into_iter()
            .filter_map(|event| {
                let stamp = event.last_timestamp.or(event.event_time)?;
                let time = DateTime::parse_from_rfc3339(&stamp).ok()?.with_timezone(&Utc);
                Some(Event {
                    time,
                    code: event.reason,
                    description: vec![event.message],
                })
            })
            .collect();

        self.state.set(JobState {
            desired: job.spec.parallelism,
            active: job.status.active,
            succeeded: job.status.succeeded,
            failed: job.status.failed,
            addresses,
            events,
        });
        Ok(())
    }

    /// Output of every pod, ordered by pod name.
    ///
    /// # Errors
    ///
    /// Returns the provider error of the first failing `kubectl` call.
    pub fn logs(&self) -> Result<Vec<String>, ResourceError> {
        self.pods()?
            .into_iter()
            .map(|pod| {
                self.client
                    .run(["logs", pod.metadata.name.as_str(), "--all-containers"])
            })
            .collect()
    }
}

impl Resource for Job {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.client.create(&self.manifest()?) {
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
                    .run([
                        "delete",
                        "job",
                        self.client.name(),
                        "--cascade=foreground",
                    ])
                    .map(|_| ()),
            )?;
            self.state.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::*;
    use crate::common::{Environment, Size};
    use crate::k8s::tests::client;
    use crate::test_support::ScriptedRunner;

    fn job(runner: &ScriptedRunner, task: Task) -> Job {
        let inputs = JobInputs {
            config_map: Slot::new("config map"),
            claim: Slot::new("persistent volume claim"),
        };
        inputs.config_map.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        inputs.claim.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        Job::new(Arc::new(client(runner)), inputs, task)
    }

    #[rstest]
    #[case("8-32Gi", "8", "32Gi", None)]
    #[case("4-16Gi+nvidia-tesla-t4", "4", "16Gi", Some(("nvidia-tesla-t4", 1)))]
    #[case("64-512Gi+nvidia-tesla-v100*8", "64", "512Gi", Some(("nvidia-tesla-v100", 8)))]
    fn parses_pod_resources(
        #[case] value: &str,
        #[case] cpu: &str,
        #[case] memory: &str,
        #[case] accelerator: Option<(&str, u16)>,
    ) {
        let parsed = PodResources::parse(value).expect("parse");
        assert_eq!(
            parsed,
            PodResources {
                cpu: cpu.to_owned(),
                memory: memory.to_owned(),
                accelerator: accelerator.map(|(kind, count)| (kind.to_owned(), count)),
            }
        );
    }

    #[test]
    fn rejects_machine_types_without_memory() {
        assert!(PodResources::parse("e2-micro+gpu*x").is_err());
        assert!(PodResources::parse("large").is_err());
    }

    #[test]
    fn manifest_mounts_script_and_volume() {
        let runner = ScriptedRunner::new();
        let task = Task {
            parallelism: 3,
            size: Size {
                machine: String::from("m+v100"),
                storage_gb: None,
            },
            environment: Environment {
                variables: BTreeMap::from([(String::from("DATASET"), Some(String::from("v2")))]),
                ..Environment::default()
            },
            ..Task::default()
        };
        let manifest = job(&runner, task).manifest().expect("manifest");

        assert_eq!(manifest.pointer("/spec/completions"), Some(&json!(3)));
        let pod = manifest.pointer("/spec/template/spec").expect("pod spec");
        assert_eq!(pod.pointer("/containers/0/image"), Some(&json!("ubuntu:20.04")));
        assert_eq!(
            pod.pointer("/containers/0/command"),
            Some(&json!(["/bin/sh", "/script/script"]))
        );
        assert_eq!(
            pod.pointer("/containers/0/resources/limits/nvidia.com~1gpu"),
            Some(&json!(1))
        );
        assert_eq!(pod.pointer("/nodeSelector/accelerator"), Some(&json!("nvidia-tesla-v100")));
        let env = pod.pointer("/containers/0/env").and_then(|env| env.as_array()).expect("env");
        assert!(env.contains(&json!({"name": "DATASET", "value": "v2"})));
        assert!(env.contains(&json!({"name": "TPI_TASK_CLOUD_PROVIDER", "value": "k8s"})));
        assert!(!env.iter().any(|entry| entry["name"] == "RCLONE_REMOTE"));
    }

    #[tokio::test]
    async fn read_collects_counts_addresses_and_events() {
        let runner = ScriptedRunner::new();
        runner.push_stdout(r#"{"spec":{"parallelism":2},"status":{"active":1,"succeeded":1}}"#);
        runner.push_stdout(
            r#"{"items":[{"metadata":{"name":"b"},"status":{"podIP":"10.0.0.2"}},{"metadata":{"name":"a"},"status":{}}]}"#,
        );
        runner.push_stdout(
            r#"{"items":[{"lastTimestamp":"2026-10-19T08:00:00Z","reason":"SuccessfulCreate","message":"Created pod: a"}]}"#,
        );
        let job = job(&runner, Task::default());

        job.read().await.expect("read");

        let state = job.state.require().expect("state");
        assert_eq!((state.desired, state.active, state.succeeded, state.failed), (2, 1, 1, 0));
        assert_eq!(state.addresses, vec![String::from("10.0.0.2")]);
        assert_eq!(state.events.len(), 1);
    }

    #[test]
    fn logs_follow_pod_name_order() {
        let runner = ScriptedRunner::new();
        runner.push_stdout(r#"{"items":[{"metadata":{"name":"pod-b"}},{"metadata":{"name":"pod-a"}}]}"#);
        runner.push_stdout("from a\n");
        runner.push_stdout("from b\n");
        let job = job(&runner, Task::default());

        let logs = job.logs().expect("logs");

        assert_eq!(logs, vec![String::from("from a\n"), String::from("from b\n")]);
        assert_eq!(
            runner.commands().get(1).map(String::as_str),
            Some("kubectl logs pod-a --all-containers")
        );
    }
}
