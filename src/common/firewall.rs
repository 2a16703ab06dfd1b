//! Abstract firewall rules and their compilation to allow-list entries.

use std::fmt;

/// Any IPv4 network.
pub const ANY_NETWORK: &str = "0.0.0.0/0";

/// Private ranges used for intra-task traffic.
pub const PRIVATE_NETWORKS: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// One traffic direction.
///
/// `None` means unrestricted; an explicit empty set allows nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FirewallRule {
    /// CIDR blocks the rule applies to.
    pub nets: Option<Vec<String>>,
    /// Ports opened on both TCP and UDP.
    pub ports: Option<Vec<u16>>,
}

/// Ingress and egress rules of a task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Firewall {
    /// Inbound traffic.
    pub ingress: FirewallRule,
    /// Outbound traffic.
    pub egress: FirewallRule,
}

impl Default for Firewall {
    fn default() -> Self {
        Self {
            ingress: FirewallRule {
                nets: None,
                ports: Some(vec![22]),
            },
            egress: FirewallRule::default(),
        }
    }
}

/// Transport protocol of a compiled permission.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Protocol {
    /// Every protocol and port.
    All,
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Lowercase protocol name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single allow-list entry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Permission {
    /// Protocol allowed.
    pub protocol: Protocol,
    /// Port allowed; `None` together with [`Protocol::All`].
    pub port: Option<u16>,
    /// Network the traffic may come from or go to.
    pub net: String,
}

impl FirewallRule {
    /// Compiles the rule into allow-list entries.
    ///
    /// An empty result denies all traffic in this direction.
    #[must_use]
    pub fn compile(&self) -> Vec<Permission> {
        let nets = self
            .nets
            .clone()
            .unwrap_or_else(|| vec![ANY_NETWORK.to_owned()]);

        let Some(ports) = &self.ports else {
            return nets
                .into_iter()
                .map(|net| Permission {
                    protocol: Protocol::All,
                    port: None,
                    net,
                })
                .collect();
        };

        nets.iter()
            .flat_map(move |net| {
                ports.iter().flat_map(move |port| {
                    [Protocol::Tcp, Protocol::Udp].into_iter().map(move |protocol| Permission {
                        protocol,
                        port: Some(*port),
                        net: net.clone(),
                    })
                })
            })
            .collect()
    }

    /// Returns `true` when the rule allows nothing.
    #[must_use]
    pub fn denies_all(&self) -> bool {
        self.compile().is_empty()
    }

    /// Returns `true` when the rule allows every network and port.
    #[must_use]
    pub fn allows_all(&self) -> bool {
        self.nets.is_none() && self.ports.is_none()
    }
}
