//! Virtual network, network security group, and subnet.

use std::sync::Arc;

use serde::Deserialize;

use crate::az::Client;
use crate::common::{
    ANY_NETWORK, Firewall, FirewallRule, Resource, ResourceError, ResourceFuture, Slot,
    ignore_not_found,
};

const NETWORK_PREFIX: &str = "10.0.0.0/16";
const SUBNET_PREFIX: &str = "10.0.0.0/24";

#[derive(Deserialize)]
struct Identified {
    id: String,
}

/// Virtual network named after the identifier.
#[derive(Debug)]
pub struct VirtualNetwork {
    client: Arc<Client>,
    group: Slot<String>,
    /// Observed network name.
    pub name: Slot<String>,
}

impl VirtualNetwork {
    /// Creates an unresolved handle inside `group`.
    #[must_use]
    pub fn new(client: Arc<Client>, group: Slot<String>) -> Self {
        Self {
            client,
            group,
            name: Slot::new("virtual network"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let group = self.group.require()?;
        let name = self.client.identifier.long();
        self.client.run([
            "network",
            "vnet",
            "show",
            "--name",
            name,
            "--resource-group",
            group.as_str(),
        ])?;
        self.name.set(name.to_owned());
        Ok(())
    }
}

impl Resource for VirtualNetwork {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let group = self.group.require()?;
            let mut args = vec![
                String::from("network"),
                String::from("vnet"),
                String::from("create"),
                String::from("--name"),
                self.client.identifier.long().to_owned(),
                String::from("--resource-group"),
                group,
                String::from("--location"),
                self.client.location.clone(),
                String::from("--address-prefixes"),
                NETWORK_PREFIX.to_owned(),
            ];
            args.extend(self.client.tag_args());
            match self.client.run(args) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
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
                        "network",
                        "vnet",
                        "delete",
                        "--name",
                        self.client.identifier.long(),
                        "--resource-group",
                        self.client.group(),
                    ])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}

/// One network security group rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityRule {
    /// Rule name.
    pub name: &'static str,
    /// Lower numbers win.
    pub priority: u16,
    /// `Inbound` or `Outbound`.
    pub direction: &'static str,
    /// `Allow` or `Deny`.
    pub access: &'static str,
    /// Remote address prefixes.
    pub addresses: Vec<String>,
    /// Port ranges, `*` for all.
    pub ports: Vec<String>,
}

impl SecurityRule {
    fn arguments(&self, group: &str, nsg: &str) -> Vec<String> {
        let (remote, local) = if self.direction == "Inbound" {
            ("--source-address-prefixes", "--destination-address-prefixes")
        } else {
            ("--destination-address-prefixes", "--source-address-prefixes")
        };
        let mut args = vec![
            String::from("network"),
            String::from("nsg"),
            String::from("rule"),
            String::from("create"),
            String::from("--resource-group"),
            group.to_owned(),
            String::from("--nsg-name"),
            nsg.to_owned(),
            String::from("--name"),
            self.name.to_owned(),
            String::from("--priority"),
            self.priority.to_string(),
            String::from("--direction"),
            self.direction.to_owned(),
            String::from("--access"),
            self.access.to_owned(),
            String::from("--protocol"),
            String::from("*"),
            String::from(remote),
        ];
        args.extend(self.addresses.iter().cloned());
        args.push(String::from(local));
        args.push(String::from("*"));
        args.push(String::from("--destination-port-ranges"));
        args.extend(self.ports.iter().cloned());
        args
    }
}

fn rule_scope(rule: &FirewallRule) -> (Vec<String>, Vec<String>) {
    let addresses = rule.nets.clone().map_or_else(
        || vec![String::from("*")],
        |nets| {
            nets.into_iter()
                .map(|net| if net == ANY_NETWORK { String::from("*") } else { net })
                .collect()
        },
    );
    let ports = rule.ports.as_ref().map_or_else(
        || vec![String::from("*")],
        |ports| ports.iter().map(ToString::to_string).collect(),
    );
    (addresses, ports)
}

/// Translates the firewall into rules layered over the Azure defaults, which
/// already allow virtual network traffic and deny other inbound traffic.
#[must_use]
pub fn security_rules(firewall: &Firewall) -> Vec<SecurityRule> {
    let mut rules = Vec::new();
    if !firewall.ingress.denies_all() {
        let (addresses, ports) = rule_scope(&firewall.ingress);
        rules.push(SecurityRule {
            name: "tpi-ingress",
            priority: 100,
            direction: "Inbound",
            access: "Allow",
            addresses,
            ports,
        });
    }
    if !firewall.egress.allows_all() {
        if !firewall.egress.denies_all() {
            let (addresses, ports) = rule_scope(&firewall.egress);
            rules.push(SecurityRule {
                name: "tpi-egress",
                priority: 100,
                direction: "Outbound",
                access: "Allow",
                addresses,
                ports,
            });
        }
        rules.push(SecurityRule {
            name: "tpi-egress-deny",
            priority: 200,
            direction: "Outbound",
            access: "Deny",
            addresses: vec![String::from("Internet")],
            ports: vec![String::from("*")],
        });
    }
    rules
}

/// Network security group with the task rules.
#[derive(Debug)]
pub struct SecurityGroup {
    client: Arc<Client>,
    group: Slot<String>,
    firewall: Firewall,
    /// Observed security group resource identifier.
    pub id: Slot<String>,
}

impl SecurityGroup {
    /// Creates an unresolved handle inside `group`.
    #[must_use]
    pub fn new(client: Arc<Client>, group: Slot<String>, firewall: Firewall) -> Self {
        Self {
            client,
            group,
            firewall,
            id: Slot::new("security group"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let group = self.group.require()?;
        let found: Identified = self.client.json(
            "security group",
            [
                "network",
                "nsg",
                "show",
                "--name",
                self.client.identifier.long(),
                "--resource-group",
                group.as_str(),
            ],
        )?;
        self.id.set(found.id);
        Ok(())
    }
}

impl Resource for SecurityGroup {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let group = self.group.require()?;
            let name = self.client.identifier.long();
            let mut args = vec![
                String::from("network"),
                String::from("nsg"),
                String::from("create"),
                String::from("--name"),
                name.to_owned(),
                String::from("--resource-group"),
                group.clone(),
                String::from("--location"),
                self.client.location.clone(),
            ];
            args.extend(self.client.tag_args());
            match self.client.run(args) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
            // Rule creation overwrites rules of the same name.
            for rule in security_rules(&self.firewall) {
                self.client.run(rule.arguments(&group, name))?;
            }
            self.lookup()
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
                        "network",
                        "nsg",
                        "delete",
                        "--name",
                        self.client.identifier.long(),
                        "--resource-group",
                        self.client.group(),
                    ])
                    .map(|_| ()),
            )?;
            self.id.clear();
            Ok(())
        })
    }
}

/// Subnet of the virtual network bound to the security group.
#[derive(Debug)]
pub struct Subnet {
    client: Arc<Client>,
    network: Slot<String>,
    security_group: Slot<String>,
    /// Observed subnet resource identifier.
    pub id: Slot<String>,
}

impl Subnet {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>, network: Slot<String>, security_group: Slot<String>) -> Self {
        Self {
            client,
            network,
            security_group,
            id: Slot::new("subnet"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let network = self.network.require()?;
        let found: Identified = self.client.json(
            "subnet",
            [
                "network",
                "vnet",
                "subnet",
                "show",
                "--name",
                self.client.identifier.long(),
                "--vnet-name",
                network.as_str(),
                "--resource-group",
                self.client.group(),
            ],
        )?;
        self.id.set(found.id);
        Ok(())
    }
}

impl Resource for Subnet {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let network = self.network.require()?;
            let security_group = self.security_group.require()?;
            let result = self.client.run([
                "network",
                "vnet",
                "subnet",
                "create",
                "--name",
                self.client.identifier.long(),
                "--vnet-name",
                network.as_str(),
                "--resource-group",
                self.client.group(),
                "--address-prefixes",
                SUBNET_PREFIX,
                "--network-security-group",
                security_group.as_str(),
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

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let name = self.client.identifier.long();
            ignore_not_found(
                self.client
                    .run([
                        "network",
                        "vnet",
                        "subnet",
                        "delete",
                        "--name",
                        name,
                        "--vnet-name",
                        name,
                        "--resource-group",
                        self.client.group(),
                    ])
                    .map(|_| ()),
            )?;
            self.id.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::az::tests::{client, push_login};
    use crate::test_support::ScriptedRunner;

    #[test]
    fn default_firewall_opens_ssh_only() {
        let rules = security_rules(&Firewall::default());
        assert_eq!(
            rules,
            vec![SecurityRule {
                name: "tpi-ingress",
                priority: 100,
                direction: "Inbound",
                access: "Allow",
                addresses: vec![String::from("*")],
                ports: vec![String::from("22")],
            }]
        );
    }

    #[test]
    fn closed_egress_only_denies() {
        let firewall = Firewall {
            ingress: FirewallRule {
                nets: Some(Vec::new()),
                ports: None,
            },
            egress: FirewallRule {
                nets: Some(Vec::new()),
                ports: None,
            },
        };
        let names: Vec<&str> = security_rules(&firewall).iter().map(|rule| rule.name).collect();
        assert_eq!(names, vec!["tpi-egress-deny"]);
    }

    #[tokio::test]
    async fn security_group_creates_rules_then_reads_id() {
        let runner = ScriptedRunner::new();
        push_login(&runner);
        runner.push_stdout("{}");
        runner.push_stdout("{}");
        runner.push_stdout(r#"{"id":"/subscriptions/s/nsg"}"#);
        let group = Slot::new("resource group");
        group.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        let nsg = SecurityGroup::new(Arc::new(client(&runner)), group, Firewall::default());

        nsg.create().await.expect("create");

        assert_eq!(nsg.id.get().as_deref(), Some("/subscriptions/s/nsg"));
        let rule = runner.commands().get(3).cloned().unwrap_or_default();
        assert!(rule.contains("--source-address-prefixes * --destination-address-prefixes * --destination-port-ranges 22"));
    }

    #[tokio::test]
    async fn subnet_requires_security_group() {
        let runner = ScriptedRunner::new();
        let network = Slot::new("virtual network");
        network.set(String::from("tpi-test-3z4xlzwq-3u0vweb4"));
        let subnet = Subnet::new(
            Arc::new(client(&runner)),
            network,
            Slot::new("security group"),
        );
        assert_eq!(
            subnet.create().await,
            Err(ResourceError::Unresolved("security group"))
        );
    }
}
