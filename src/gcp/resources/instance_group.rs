//! Managed instance group: the scaling primitive of the GCP backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::common::{Event, Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::gcp::Client;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manager {
    #[serde(default)]
    target_size: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagerError {
    timestamp: String,
    error: ErrorDetail,
    #[serde(default)]
    instance_action_details: Option<ActionDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ActionDetail {
    #[serde(default)]
    action: String,
    #[serde(default)]
    instance: String,
}

/// Observed state of the group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupState {
    /// Requested machine count.
    pub desired: u32,
    /// Machines with status `RUNNING`.
    pub running: u32,
    /// External addresses of the machines.
    pub addresses: Vec<String>,
    /// Recent instance creation and deletion errors.
    pub events: Vec<Event>,
}

/// Zonal managed instance group named after the identifier.
#[derive(Debug)]
pub struct InstanceGroupManager {
    client: Arc<Client>,
    template: Slot<String>,
    parallelism: u16,
    /// Observed state.
    pub state: Slot<GroupState>,
}

impl InstanceGroupManager {
    /// Creates an unresolved handle depending on `template`.
    #[must_use]
    pub fn new(client: Arc<Client>, template: Slot<String>, parallelism: u16) -> Self {
        Self {
            client,
            template,
            parallelism,
            state: Slot::new("instance group manager"),
        }
    }

    fn name(&self) -> &str {
        self.client.identifier.long()
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.name();
        let zone = self.client.zone.as_str();
        let manager: Manager = self.client.json(
            "instance group manager",
            [
                "compute",
                "instance-groups",
                "managed",
                "describe",
                name,
                "--zone",
                zone,
            ],
        )?;

        let filter = format!("--filter=tags.items={name}");
        let instances: Vec<Instance> = self.client.json(
            "instances",
            ["compute", "instances", "list", "--zones", zone, filter.as_str()],
        )?;
        let running = instances
            .iter()
            .filter(|instance| instance.status == "RUNNING")
            .count();
        let addresses = instances
            .into_iter()
            .flat_map(|instance| instance.network_interfaces)
            .flat_map(|interface| interface.access_configs)
            .filter_map(|config| config.nat_ip)
            .collect();

        let errors: Vec<ManagerError> = self.client.json(
            "instance group errors",
            [
                "compute",
                "instance-groups",
                "managed",
                "list-errors",
                name,
                "--zone",
                zone,
            ],
        )?;
        let events = errors
            .into_iter()
            .filter_map(|entry| {
                let time = DateTime::parse_from_rfc3339(&entry.timestamp)
                    .ok()?
                    .with_timezone(&Utc);
                let mut description = vec![entry.error.message];
                if let Some(detail) = entry.instance_action_details {
                    description.push(format!("{} {}", detail.action, detail.instance));
                }
                Some(Event {
                    time,
                    code: entry.error.code,
                    description,
                })
            })
            .collect();

        self.state.set(GroupState {
            desired: manager.target_size,
            running: u32::try_from(running).unwrap_or(u32::MAX),
            addresses,
            events,
        });
        Ok(())
    }

    /// Sets the target size without touching anything else.
    pub fn resize(&self, count: u16) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.client.run([
                String::from("compute"),
                String::from("instance-groups"),
                String::from("managed"),
                String::from("resize"),
                self.name().to_owned(),
                String::from("--zone"),
                self.client.zone.clone(),
                String::from("--size"),
                count.to_string(),
            ])?;
            self.lookup()
        })
    }
}

impl Resource for InstanceGroupManager {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let template = self.template.require()?;
            let result = self.client.run([
                String::from("compute"),
                String::from("instance-groups"),
                String::from("managed"),
                String::from("create"),
                self.name().to_owned(),
                String::from("--zone"),
                self.client.zone.clone(),
                String::from("--template"),
                template,
                String::from("--size"),
                self.parallelism.to_string(),
                String::from("--base-instance-name"),
                self.name().to_owned(),
            ]);
            match result {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn update(&self) -> ResourceFuture<'_> {
        self.resize(self.parallelism)
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            ignore_not_found(
                self.client
                    .run([
                        "compute",
                        "instance-groups",
                        "managed",
                        "delete",
                        self.name(),
                        "--zone",
                        self.client.zone.as_str(),
                        "--quiet",
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
    use super::*;
    use crate::gcp::tests::client;
    use crate::test_support::ScriptedRunner;

    fn push_lookup(runner: &ScriptedRunner) {
        runner.push_stdout(r#"{"targetSize":2}"#);
        runner.push_stdout(
            r#"[{"status":"RUNNING","networkInterfaces":[{"accessConfigs":[{"natIP":"34.1.2.3"}]}]},
                {"status":"STAGING","networkInterfaces":[{"accessConfigs":[{}]}]}]"#,
        );
        runner.push_stdout(
            r#"[{"timestamp":"2026-10-19T08:00:00.000-07:00","error":{"code":"ZONE_RESOURCE_POOL_EXHAUSTED","message":"no capacity"},"instanceActionDetails":{"action":"CREATING","instance":"tpi-x-abcd"}}]"#,
        );
    }

    fn group(runner: &ScriptedRunner) -> InstanceGroupManager {
        let template = Slot::new("instance template");
        template.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        InstanceGroupManager::new(Arc::new(client(runner)), template, 2)
    }

    #[tokio::test]
    async fn read_collects_running_machines_and_errors() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        push_lookup(&runner);
        let group = group(&runner);

        group.read().await.expect("read");

        let state = group.state.require().expect("state");
        assert_eq!(state.desired, 2);
        assert_eq!(state.running, 1);
        assert_eq!(state.addresses, vec![String::from("34.1.2.3")]);
        assert_eq!(
            state.events.first().map(|event| event.code.as_str()),
            Some("ZONE_RESOURCE_POOL_EXHAUSTED")
        );
        assert_eq!(
            runner.commands().get(2).map(String::as_str),
            Some("gcloud compute instances list --zones us-east1-c --filter=tags.items=tpi-test-3z4xlzwq-3u0vweb4 --project project --format json")
        );
    }

    #[tokio::test]
    async fn resize_sets_explicit_size() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        push_lookup(&runner);
        let group = group(&runner);

        group.resize(0).await.expect("resize");

        assert_eq!(
            runner.commands().get(1).map(String::as_str),
            Some("gcloud compute instance-groups managed resize tpi-test-3z4xlzwq-3u0vweb4 --zone us-east1-c --size 0 --project project --format json")
        );
    }

    #[tokio::test]
    async fn delete_tolerates_absence() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_failure(
            1,
            "ERROR: (gcloud.compute.instance-groups.managed.delete) Could not fetch resource:\n - The resource 'projects/project/zones/us-east1-c/instanceGroupManagers/x' was not found",
        );
        let group = group(&runner);

        assert_eq!(group.delete().await, Ok(()));
    }
}
