//! Auto scaling group: the scaling primitive that owns the machines.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::aws::Client;
use crate::common::{
    Event, Resource, ResourceError, ResourceFuture, Slot, Spot, SpotPolicy, ignore_not_found,
};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Groups {
    #[serde(default)]
    auto_scaling_groups: Vec<Group>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Group {
    #[serde(default)]
    desired_capacity: u32,
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    lifecycle_state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservations {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    public_ip_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Activities {
    #[serde(default)]
    activities: Vec<Activity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Activity {
    start_time: String,
    #[serde(default)]
    status_code: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    cause: String,
}

/// Observed state of the group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupState {
    /// Requested machine count.
    pub desired: u32,
    /// Machines in service.
    pub running: u32,
    /// Public addresses of the machines.
    pub addresses: Vec<String>,
    /// Scaling activities.
    pub events: Vec<Event>,
}

/// Auto scaling group named after the identifier.
#[derive(Debug)]
pub struct AutoScalingGroup {
    client: Arc<Client>,
    subnets: Slot<Vec<String>>,
    launch_template: Slot<String>,
    parallelism: u16,
    spot: Spot,
    /// Observed state.
    pub state: Slot<GroupState>,
}

impl AutoScalingGroup {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(
        client: Arc<Client>,
        subnets: Slot<Vec<String>>,
        launch_template: Slot<String>,
        parallelism: u16,
        spot: Spot,
    ) -> Self {
        Self {
            client,
            subnets,
            launch_template,
            parallelism,
            spot,
            state: Slot::new("auto scaling group"),
        }
    }

    fn group_name(&self) -> String {
        self.client.identifier.long().to_owned()
    }

    fn template_reference(&self) -> Result<Value, ResourceError> {
        let template = self.launch_template.require()?;
        Ok(json!({ "LaunchTemplateId": template, "Version": "$Latest" }))
    }

    fn create_arguments(&self) -> Result<Vec<String>, ResourceError> {
        let subnets = self.subnets.require()?;
        let size = self.parallelism.to_string();
        let tags: Vec<Value> = self
            .client
            .tags
            .iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value, "PropagateAtLaunch": true }))
            .collect();

        let mut args = vec![
            String::from("autoscaling"),
            String::from("create-auto-scaling-group"),
            String::from("--auto-scaling-group-name"),
            self.group_name(),
            String::from("--min-size"),
            String::from("0"),
            String::from("--max-size"),
            size.clone(),
            String::from("--desired-capacity"),
            size,
            String::from("--vpc-zone-identifier"),
            subnets.join(","),
            String::from("--tags"),
            Value::Array(tags).to_string(),
        ];

        let distribution = match self.spot.policy() {
            SpotPolicy::OnDemand => None,
            SpotPolicy::Auto => Some(json!({
                "OnDemandBaseCapacity": 0,
                "OnDemandPercentageAboveBaseCapacity": 0,
                "SpotAllocationStrategy": "capacity-optimized",
            })),
            SpotPolicy::Fixed(price) => Some(json!({
                "OnDemandBaseCapacity": 0,
                "OnDemandPercentageAboveBaseCapacity": 0,
                "SpotAllocationStrategy": "capacity-optimized",
                "SpotMaxPrice": format!("{price:.5}"),
            })),
        };

        match distribution {
            None => {
                args.push(String::from("--launch-template"));
                args.push(self.template_reference()?.to_string());
            }
            Some(distribution) => {
                let policy = json!({
                    "LaunchTemplate": {
                        "LaunchTemplateSpecification": self.template_reference()?,
                    },
                    "InstancesDistribution": distribution,
                });
                args.push(String::from("--mixed-instances-policy"));
                args.push(policy.to_string());
            }
        }
        Ok(args)
    }

    fn describe(&self) -> Result<Group, ResourceError> {
        let name = self.group_name();
        let found: Groups = self.client.json(
            "auto scaling groups",
            [
                "autoscaling",
                "describe-auto-scaling-groups",
                "--auto-scaling-group-names",
                name.as_str(),
            ],
        )?;
        found
            .auto_scaling_groups
            .into_iter()
            .next()
            .ok_or(ResourceError::NotFound)
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let group = self.describe()?;
        let running = group
            .instances
            .iter()
            .filter(|instance| instance.lifecycle_state == "InService")
            .count();

        let mut addresses = Vec::new();
        if !group.instances.is_empty() {
            let mut args = vec![
                String::from("ec2"),
                String::from("describe-instances"),
                String::from("--instance-ids"),
            ];
            args.extend(group.instances.iter().map(|instance| instance.instance_id.clone()));
            let reservations: Reservations = self.client.json("instances", args)?;
            addresses = reservations
                .reservations
                .into_iter()
                .flat_map(|reservation| reservation.instances)
                .filter_map(|instance| instance.public_ip_address)
                .collect();
        }

        let name = self.group_name();
        let activities: Activities = self.client.json(
            "scaling activities",
            [
                "autoscaling",
                "describe-scaling-activities",
                "--auto-scaling-group-name",
                name.as_str(),
            ],
        )?;
        let events = activities
            .activities
            .into_iter()
            .filter_map(|activity| {
                let time = DateTime::parse_from_rfc3339(&activity.start_time)
                    .ok()?
                    .with_timezone(&Utc);
                Some(Event {
                    time,
                    code: activity.status_code,
                    description: vec![activity.description, activity.cause],
                })
            })
            .collect();

        self.state.set(GroupState {
            desired: group.desired_capacity,
            running: u32::try_from(running).unwrap_or(u32::MAX),
            addresses,
            events,
        });
        Ok(())
    }

    /// Sets the desired machine count without touching anything else.
    pub fn resize(&self, count: u16) -> ResourceFuture<'_> {
        Box::pin(async move {
            let size = count.to_string();
            self.client.run([
                String::from("autoscaling"),
                String::from("update-auto-scaling-group"),
                String::from("--auto-scaling-group-name"),
                self.group_name(),
                String::from("--min-size"),
                String::from("0"),
                String::from("--max-size"),
                size.clone(),
                String::from("--desired-capacity"),
                size,
            ])?;
            self.lookup()
        })
    }
}

impl Resource for AutoScalingGroup {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let args = self.create_arguments()?;
            match self.client.run(args) {
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
            let name = self.group_name();
            ignore_not_found(
                self.client
                    .run([
                        "autoscaling",
                        "delete-auto-scaling-group",
                        "--auto-scaling-group-name",
                        name.as_str(),
                        "--force-delete",
                    ])
                    .map(|_| ()),
            )?;

            self.client
                .backoff()
                .until("auto scaling group deletion", || {
                    let outcome = self.describe();
                    async move {
                        match outcome {
                            Err(ResourceError::NotFound) => Ok(Some(())),
                            Ok(_) => Ok(None),
                            Err(err) => Err(err),
                        }
                    }
                })
                .await?;
            self.state.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::client;
    use crate::test_support::ScriptedRunner;

    fn group(runner: &ScriptedRunner, spot: Spot) -> AutoScalingGroup {
        let subnets = Slot::new("default subnets");
        subnets.set(vec![String::from("subnet-a"), String::from("subnet-b")]);
        let template = Slot::new("launch template");
        template.set(String::from("lt-1"));
        AutoScalingGroup::new(Arc::new(client(runner)), subnets, template, 2, spot)
    }

    fn push_lookup(runner: &ScriptedRunner) {
        runner.push_stdout(
            r#"{"AutoScalingGroups":[{"DesiredCapacity":2,"Instances":[
                {"InstanceId":"i-1","LifecycleState":"InService"},
                {"InstanceId":"i-2","LifecycleState":"Pending"}
            ]}]}"#,
        );
        runner.push_stdout(
            r#"{"Reservations":[{"Instances":[{"PublicIpAddress":"1.2.3.4"},{}]}]}"#,
        );
        runner.push_stdout(
            r#"{"Activities":[{"StartTime":"2024-01-01T00:00:00Z","StatusCode":"Successful","Description":"Launching","Cause":"capacity"}]}"#,
        );
    }

    #[test]
    fn on_demand_uses_plain_launch_template() {
        let runner = ScriptedRunner::new();
        let args = group(&runner, Spot::DISABLED).create_arguments().expect("args");
        assert!(args.contains(&String::from("--launch-template")));
        assert!(!args.contains(&String::from("--mixed-instances-policy")));
        assert!(args.contains(&String::from("subnet-a,subnet-b")));
    }

    #[test]
    fn fixed_spot_sets_max_price() {
        let runner = ScriptedRunner::new();
        let args = group(&runner, Spot(0.25)).create_arguments().expect("args");
        let policy = args.last().expect("policy");
        let parsed: Value = serde_json::from_str(policy).expect("json policy");
        assert_eq!(
            parsed["InstancesDistribution"]["SpotMaxPrice"],
            "0.25000"
        );
        assert_eq!(
            parsed["InstancesDistribution"]["OnDemandPercentageAboveBaseCapacity"],
            0
        );
    }

    #[tokio::test]
    async fn read_collects_addresses_and_events() {
        let runner = ScriptedRunner::new();
        push_lookup(&runner);
        let group = group(&runner, Spot::AUTO);

        group.read().await.expect("read");

        let state = group.state.require().expect("state");
        assert_eq!(state.desired, 2);
        assert_eq!(state.running, 1);
        assert_eq!(state.addresses, vec![String::from("1.2.3.4")]);
        assert_eq!(state.events.len(), 1);
    }

    #[tokio::test]
    async fn resize_only_touches_capacity() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        push_lookup(&runner);
        let group = group(&runner, Spot::AUTO);

        group.resize(0).await.expect("resize");

        assert_eq!(
            runner.commands().first().map(String::as_str),
            Some("aws autoscaling update-auto-scaling-group --auto-scaling-group-name tpi-test-3z4xlzwq-3u0vweb4 --min-size 0 --max-size 0 --desired-capacity 0 --output json")
        );
    }

    #[tokio::test]
    async fn delete_waits_until_gone() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_stdout(r#"{"AutoScalingGroups":[{"DesiredCapacity":0,"Instances":[]}]}"#);
        runner.push_stdout(r#"{"AutoScalingGroups":[]}"#);
        let group = group(&runner, Spot::AUTO);

        assert_eq!(group.delete().await, Ok(()));
        assert_eq!(runner.remaining(), 0);
    }
}
