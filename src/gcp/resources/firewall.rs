//! Firewall rules of the default network, scoped to the task's network tag.
//!
//! Each direction gets three rules evaluated by priority: private ranges
//! are always allowed (1), the user rule follows (2), and everything else
//! is denied (3).

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::common::{
    ANY_NETWORK, Firewall, FirewallRule, Identifier, PRIVATE_NETWORKS, Protocol, Resource,
    ResourceError, ResourceFuture, Slot, ignore_not_found,
};
use crate::gcp::Client;

/// Traffic direction of a rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Inbound traffic, matched on source ranges.
    Ingress,
    /// Outbound traffic, matched on destination ranges.
    Egress,
}

impl Direction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Ingress => "INGRESS",
            Self::Egress => "EGRESS",
        }
    }

    const fn ranges_flag(self) -> &'static str {
        match self {
            Self::Ingress => "--source-ranges",
            Self::Egress => "--destination-ranges",
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::Ingress => "in",
            Self::Egress => "eg",
        }
    }
}

/// Whether matching traffic passes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Let matching traffic through.
    Allow,
    /// Drop matching traffic.
    Deny,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        })
    }
}

/// Desired shape of one firewall rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleSpec {
    /// Rule name, unique within the project.
    pub name: String,
    /// Traffic direction.
    pub direction: Direction,
    /// Evaluation order; lower wins.
    pub priority: u16,
    /// Allow or deny.
    pub action: Action,
    /// `all` or a `tcp:22,udp:22` style list.
    pub rules: String,
    /// Source or destination ranges.
    pub ranges: Vec<String>,
    /// `false` when the user rule allows nothing and creation is skipped.
    pub enabled: bool,
}

/// Compiles `firewall` into the six rules of a task.
#[must_use]
pub fn rule_specs(identifier: &Identifier, firewall: &Firewall) -> Vec<RuleSpec> {
    [
        (Direction::Ingress, &firewall.ingress),
        (Direction::Egress, &firewall.egress),
    ]
    .into_iter()
    .flat_map(|(direction, rule)| direction_specs(identifier, direction, rule))
    .collect()
}

fn direction_specs(identifier: &Identifier, direction: Direction, rule: &FirewallRule) -> [RuleSpec; 3] {
    let name = |kind: &str| format!("{}-{}-{kind}", identifier.long(), direction.suffix());
    [
        RuleSpec {
            name: name("int"),
            direction,
            priority: 1,
            action: Action::Allow,
            rules: Protocol::All.to_string(),
            ranges: PRIVATE_NETWORKS.iter().map(|&net| net.to_owned()).collect(),
            enabled: true,
        },
        RuleSpec {
            name: name("ext"),
            direction,
            priority: 2,
            action: Action::Allow,
            rules: user_rules(rule),
            ranges: rule
                .nets
                .clone()
                .unwrap_or_else(|| vec![ANY_NETWORK.to_owned()]),
            enabled: !rule.denies_all(),
        },
        RuleSpec {
            name: name("deny"),
            direction,
            priority: 3,
            action: Action::Deny,
            rules: Protocol::All.to_string(),
            ranges: vec![ANY_NETWORK.to_owned()],
            enabled: true,
        },
    ]
}

fn user_rules(rule: &FirewallRule) -> String {
    let Some(ports) = &rule.ports else {
        return Protocol::All.to_string();
    };
    [Protocol::Tcp, Protocol::Udp]
        .into_iter()
        .flat_map(|protocol| ports.iter().map(move |port| format!("{protocol}:{port}")))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Deserialize)]
struct Described {
    name: String,
}

/// One firewall rule attached to the default network.
#[derive(Debug)]
pub struct NetworkRule {
    client: Arc<Client>,
    network: Slot<String>,
    spec: RuleSpec,
    /// Observed rule name.
    pub name: Slot<String>,
}

impl NetworkRule {
    /// Creates an unresolved handle attached to `network`.
    #[must_use]
    pub fn new(client: Arc<Client>, network: Slot<String>, spec: RuleSpec) -> Self {
        Self {
            client,
            network,
            spec,
            name: Slot::new("firewall rule"),
        }
    }

    /// Step label such as `FirewallExternalIngress`.
    #[must_use]
    pub fn label(&self) -> String {
        let tier = match (self.spec.action, self.spec.priority) {
            (Action::Deny, _) => "Deny",
            (Action::Allow, 1) => "Internal",
            (Action::Allow, _) => "External",
        };
        let direction = match self.spec.direction {
            Direction::Ingress => "Ingress",
            Direction::Egress => "Egress",
        };
        format!("Firewall{tier}{direction}")
    }

    fn create_arguments(&self) -> Result<Vec<String>, ResourceError> {
        let network = self.network.require()?;
        Ok(vec![
            String::from("compute"),
            String::from("firewall-rules"),
            String::from("create"),
            self.spec.name.clone(),
            String::from("--network"),
            network,
            String::from("--direction"),
            self.spec.direction.flag().to_owned(),
            String::from("--priority"),
            self.spec.priority.to_string(),
            String::from("--action"),
            self.spec.action.to_string(),
            String::from("--rules"),
            self.spec.rules.clone(),
            self.spec.direction.ranges_flag().to_owned(),
            self.spec.ranges.join(","),
            String::from("--target-tags"),
            self.client.identifier.long().to_owned(),
        ])
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let rule: Described = self.client.json(
            "firewall rule",
            ["compute", "firewall-rules", "describe", self.spec.name.as_str()],
        )?;
        self.name.set(rule.name);
        Ok(())
    }
}

impl Resource for NetworkRule {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            if !self.spec.enabled {
                tracing::debug!(rule = %self.spec.name, "rule allows nothing, skipping");
                return Ok(());
            }
            match self.client.run(self.create_arguments()?) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            if self.spec.enabled {
                self.lookup()
            } else {
                Ok(())
            }
        })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            ignore_not_found(
                self.client
                    .run([
                        "compute",
                        "firewall-rules",
                        "delete",
                        self.spec.name.as_str(),
                        "--quiet",
                    ])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::tests::client;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn default_firewall_compiles_to_six_tiers() {
        let specs = rule_specs(&Identifier::new("test"), &Firewall::default());

        let summary: Vec<(&str, u16, Action, &str)> = specs
            .iter()
            .map(|spec| (spec.name.as_str(), spec.priority, spec.action, spec.rules.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("tpi-test-3z4xlzwq-3u0vweb4-in-int", 1, Action::Allow, "all"),
                ("tpi-test-3z4xlzwq-3u0vweb4-in-ext", 2, Action::Allow, "tcp:22,udp:22"),
                ("tpi-test-3z4xlzwq-3u0vweb4-in-deny", 3, Action::Deny, "all"),
                ("tpi-test-3z4xlzwq-3u0vweb4-eg-int", 1, Action::Allow, "all"),
                ("tpi-test-3z4xlzwq-3u0vweb4-eg-ext", 2, Action::Allow, "all"),
                ("tpi-test-3z4xlzwq-3u0vweb4-eg-deny", 3, Action::Deny, "all"),
            ]
        );
        assert!(specs.iter().all(|spec| spec.enabled));
    }

    #[test]
    fn empty_user_rule_is_disabled() {
        let firewall = Firewall {
            ingress: FirewallRule {
                nets: Some(Vec::new()),
                ports: None,
            },
            ..Firewall::default()
        };
        let specs = rule_specs(&Identifier::new("test"), &firewall);
        assert_eq!(
            specs.iter().find(|spec| spec.name.ends_with("-in-ext")).map(|spec| spec.enabled),
            Some(false)
        );
    }

    #[tokio::test]
    async fn create_scopes_rule_to_task_tag() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        runner.push_stdout(r#"{"name":"tpi-test-3z4xlzwq-3u0vweb4-in-ext"}"#);
        let network = Slot::new("default network");
        network.set(String::from("default"));
        let spec = rule_specs(&Identifier::new("test"), &Firewall::default())
            .into_iter()
            .nth(1)
            .expect("external ingress rule");
        let rule = NetworkRule::new(Arc::new(client(&runner)), network, spec);

        rule.create().await.expect("create");

        assert_eq!(
            runner.commands().get(1).map(String::as_str),
            Some(
                "gcloud compute firewall-rules create tpi-test-3z4xlzwq-3u0vweb4-in-ext --network default --direction INGRESS --priority 2 --action ALLOW --rules tcp:22,udp:22 --source-ranges 0.0.0.0/0 --target-tags tpi-test-3z4xlzwq-3u0vweb4 --project project --format json"
            )
        );
    }

    #[tokio::test]
    async fn disabled_rule_issues_no_create() {
        let runner = ScriptedRunner::new();
        let spec = RuleSpec {
            enabled: false,
            ..rule_specs(&Identifier::new("test"), &Firewall::default())
                .remove(1)
        };
        let rule = NetworkRule::new(Arc::new(client(&runner)), Slot::new("network"), spec);

        rule.create().await.expect("create");

        assert!(runner.commands().is_empty());
    }
}
