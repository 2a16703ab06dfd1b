//! Security group scoped to the task, with its compiled firewall rules.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::aws::Client;
use crate::common::{
    Firewall, FirewallRule, Permission, Protocol, Resource, ResourceError, ResourceFuture, Slot,
};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Groups {
    #[serde(default)]
    security_groups: Vec<Group>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Group {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Created {
    group_id: String,
}

/// Security group named after the identifier.
#[derive(Debug)]
pub struct SecurityGroup {
    client: Arc<Client>,
    vpc: Slot<String>,
    firewall: Firewall,
    /// Observed group identifier.
    pub id: Slot<String>,
}

impl SecurityGroup {
    /// Creates an unresolved handle depending on `vpc`.
    #[must_use]
    pub fn new(client: Arc<Client>, vpc: Slot<String>, firewall: Firewall) -> Self {
        Self {
            client,
            vpc,
            firewall,
            id: Slot::new("security group"),
        }
    }

    fn group_name(&self) -> String {
        self.client.identifier.long().to_owned()
    }

    fn lookup(&self) -> Result<String, ResourceError> {
        let vpc = self.vpc.require()?;
        let found: Groups = self.client.json(
            "security groups",
            [
                String::from("ec2"),
                String::from("describe-security-groups"),
                String::from("--filters"),
                format!("Name=group-name,Values={}", self.group_name()),
                format!("Name=vpc-id,Values={vpc}"),
            ],
        )?;
        let group = found
            .security_groups
            .into_iter()
            .next()
            .ok_or(ResourceError::NotFound)?;
        self.id.set(group.group_id.clone());
        Ok(group.group_id)
    }

    fn create_group(&self) -> Result<String, ResourceError> {
        let vpc = self.vpc.require()?;
        let name = self.group_name();
        let specification = json!([{
            "ResourceType": "security-group",
            "Tags": self.client.tag_list(),
        }]);
        let created: Created = self.client.json(
            "security group",
            [
                String::from("ec2"),
                String::from("create-security-group"),
                String::from("--group-name"),
                name.clone(),
                String::from("--description"),
                name,
                String::from("--vpc-id"),
                vpc,
                String::from("--tag-specifications"),
                specification.to_string(),
            ],
        )?;
        Ok(created.group_id)
    }

    fn authorize(&self, group: &str) -> Result<(), ResourceError> {
        let internal = json!([{
            "IpProtocol": "-1",
            "UserIdGroupPairs": [{ "GroupId": group }],
        }]);
        self.permit("authorize-security-group-ingress", group, &internal)?;
        self.permit("authorize-security-group-egress", group, &internal)?;

        let ingress = ip_permissions(&self.firewall.ingress);
        if !ingress.is_empty() {
            self.permit(
                "authorize-security-group-ingress",
                group,
                &Value::Array(ingress),
            )?;
        }

        if !self.firewall.egress.allows_all() {
            let everything = json!([{ "IpProtocol": "-1", "IpRanges": [{ "CidrIp": "0.0.0.0/0" }] }]);
            self.permit("revoke-security-group-egress", group, &everything)?;
            let egress = ip_permissions(&self.firewall.egress);
            if !egress.is_empty() {
                self.permit(
                    "authorize-security-group-egress",
                    group,
                    &Value::Array(egress),
                )?;
            }
        }
        Ok(())
    }

    fn permit(&self, action: &str, group: &str, permissions: &Value) -> Result<(), ResourceError> {
        let result = self.client.run([
            String::from("ec2"),
            action.to_owned(),
            String::from("--group-id"),
            group.to_owned(),
            String::from("--ip-permissions"),
            permissions.to_string(),
        ]);
        match result {
            Ok(_) | Err(ResourceError::AlreadyExists(_) | ResourceError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Converts a firewall rule into EC2 `IpPermissions`.
#[must_use]
pub fn ip_permissions(rule: &FirewallRule) -> Vec<Value> {
    rule.compile()
        .into_iter()
        .map(|Permission { protocol, port, net }| {
            let port_range = port.map_or(-1, i32::from);
            match protocol {
                Protocol::All => json!({
                    "IpProtocol": "-1",
                    "IpRanges": [{ "CidrIp": net }],
                }),
                Protocol::Tcp | Protocol::Udp => json!({
                    "IpProtocol": protocol.as_str(),
                    "FromPort": port_range,
                    "ToPort": port_range,
                    "IpRanges": [{ "CidrIp": net }],
                }),
            }
        })
        .collect()
}

impl Resource for SecurityGroup {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let group = match self.create_group() {
                Ok(group) => group,
                Err(ResourceError::AlreadyExists(_)) => self.lookup()?,
                Err(err) => return Err(err),
            };
            self.authorize(&group)?;
            self.id.set(group);
            Ok(())
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup().map(|_| ()) })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let group = match self.lookup() {
                Ok(group) => group,
                Err(ResourceError::NotFound | ResourceError::Unresolved(_)) => {
                    self.id.clear();
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            // Instances release the group asynchronously after termination.
            self.client
                .backoff()
                .until("security group release", || {
                    let outcome = self.client.run(["ec2", "delete-security-group", "--group-id", group.as_str()]);
                    async move {
                        match outcome {
                            Ok(_) | Err(ResourceError::NotFound) => Ok(Some(())),
                            Err(ResourceError::Provider { code, .. })
                                if code == "DependencyViolation" =>
                            {
                                Ok(None)
                            }
                            Err(err) => Err(err),
                        }
                    }
                })
                .await?;
            self.id.clear();
            Ok(())
        })
    }
}
