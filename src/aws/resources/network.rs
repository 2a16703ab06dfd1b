//! Default VPC and its default subnets.
//!
//! Both are shared account infrastructure: they are adopted, never deleted.

use std::sync::Arc;

use serde::Deserialize;

use crate::aws::Client;
use crate::common::{Resource, ResourceError, ResourceFuture, Slot};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpcs {
    #[serde(default)]
    vpcs: Vec<Vpc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpc {
    vpc_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnets {
    #[serde(default)]
    subnets: Vec<Subnet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnet {
    subnet_id: String,
    #[serde(default)]
    map_public_ip_on_launch: bool,
    #[serde(default)]
    available_ip_address_count: u32,
}

/// The account's default VPC in the task region.
#[derive(Debug)]
pub struct DefaultVpc {
    client: Arc<Client>,
    /// Observed VPC identifier.
    pub id: Slot<String>,
}

impl DefaultVpc {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            id: Slot::new("default VPC"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let found: Vpcs = self.client.json(
            "default VPC",
            [
                "ec2",
                "describe-vpcs",
                "--filters",
                "Name=isDefault,Values=true",
            ],
        )?;
        let vpc = found.vpcs.into_iter().next().ok_or(ResourceError::NotFound)?;
        self.id.set(vpc.vpc_id);
        Ok(())
    }
}

impl Resource for DefaultVpc {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.lookup() {
                Err(ResourceError::NotFound) => {
                    tracing::info!(region = %self.client.region, "creating default VPC");
                    self.client.run(["ec2", "create-default-vpc"])?;
                    self.lookup()
                }
                other => other,
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.id.clear();
            Ok(())
        })
    }
}

/// Default subnets of the default VPC that assign public addresses.
#[derive(Debug)]
pub struct DefaultVpcSubnets {
    client: Arc<Client>,
    vpc: Slot<String>,
    /// Observed subnet identifiers.
    pub ids: Slot<Vec<String>>,
}

impl DefaultVpcSubnets {
    /// Creates an unresolved handle depending on `vpc`.
    #[must_use]
    pub fn new(client: Arc<Client>, vpc: Slot<String>) -> Self {
        Self {
            client,
            vpc,
            ids: Slot::new("default subnets"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let vpc = self.vpc.require()?;
        let found: Subnets = self.client.json(
            "default subnets",
            [
                String::from("ec2"),
                String::from("describe-subnets"),
                String::from("--filters"),
                format!("Name=vpc-id,Values={vpc}"),
                String::from("Name=default-for-az,Values=true"),
            ],
        )?;
        let ids: Vec<String> = found
            .subnets
            .into_iter()
            .filter(|subnet| subnet.map_public_ip_on_launch && subnet.available_ip_address_count > 0)
            .map(|subnet| subnet.subnet_id)
            .collect();
        if ids.is_empty() {
            return Err(ResourceError::NotFound);
        }
        self.ids.set(ids);
        Ok(())
    }
}

impl Resource for DefaultVpcSubnets {
    fn create(&self) -> ResourceFuture<'_> {
        self.read()
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.ids.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::client;
    use crate::test_support::ScriptedRunner;

    #[tokio::test]
    async fn subnets_keep_only_public_ones() {
        let runner = ScriptedRunner::new();
        runner.push_stdout(r#"{"Vpcs":[{"VpcId":"vpc-1"}]}"#);
        runner.push_stdout(
            r#"{"Subnets":[
                {"SubnetId":"subnet-a","MapPublicIpOnLaunch":true,"AvailableIpAddressCount":10},
                {"SubnetId":"subnet-b","MapPublicIpOnLaunch":false,"AvailableIpAddressCount":10}
            ]}"#,
        );
        let client = Arc::new(client(&runner));
        let vpc = DefaultVpc::new(Arc::clone(&client));
        let subnets = DefaultVpcSubnets::new(client, vpc.id.clone());

        vpc.read().await.expect("vpc read");
        subnets.read().await.expect("subnets read");

        assert_eq!(subnets.ids.get(), Some(vec![String::from("subnet-a")]));
        assert_eq!(
            runner.commands().last().map(String::as_str),
            Some("aws ec2 describe-subnets --filters Name=vpc-id,Values=vpc-1 Name=default-for-az,Values=true --output json")
        );
    }

    #[tokio::test]
    async fn missing_default_vpc_is_created() {
        let runner = ScriptedRunner::new();
        runner.push_stdout(r#"{"Vpcs":[]}"#);
        runner.push_stdout(r#"{"Vpc":{"VpcId":"vpc-2"}}"#);
        runner.push_stdout(r#"{"Vpcs":[{"VpcId":"vpc-2"}]}"#);
        let vpc = DefaultVpc::new(Arc::new(client(&runner)));

        vpc.create().await.expect("vpc create");

        assert_eq!(vpc.id.get().as_deref(), Some("vpc-2"));
    }

    #[tokio::test]
    async fn subnets_require_the_vpc() {
        let runner = ScriptedRunner::new();
        let client = Arc::new(client(&runner));
        let vpc = DefaultVpc::new(Arc::clone(&client));
        let subnets = DefaultVpcSubnets::new(client, vpc.id.clone());
        assert_eq!(
            subnets.read().await,
            Err(ResourceError::Unresolved("default VPC"))
        );
    }
}
