//! Provider-agnostic data model and lifecycle primitives.

pub mod backoff;
pub mod cloud;
pub mod error;
pub mod firewall;
pub mod identifier;
pub mod resource;
pub mod settings;
pub mod ssh;
pub mod steps;
pub mod task;

pub use backoff::{Backoff, within};
pub use cloud::{
    AwsCredentials, AzureCredentials, Cloud, Credentials, GcpCredentials, KubernetesCredentials,
    Provider, Region, Timeouts,
};
pub use error::{ResourceError, ignore_not_found};
pub use firewall::{ANY_NETWORK, Firewall, FirewallRule, PRIVATE_NETWORKS, Permission, Protocol};
pub use identifier::{Identifier, parse_identifier};
pub use resource::{Resource, ResourceFuture, Slot, create_or_read};
pub use settings::{Programs, Settings};
pub use ssh::DeterministicKeyPair;
pub use steps::{Step, run_steps};
pub use task::{Environment, Event, Size, Spot, SpotPolicy, Status, Task, split_image};
