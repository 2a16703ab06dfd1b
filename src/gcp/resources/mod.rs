//! Compute Engine and Cloud Storage resources of one task.

mod bucket;
mod firewall;
mod image;
mod instance_group;
mod instance_template;
mod network;

pub use bucket::{Bucket, Credentials, CredentialsState};
pub use firewall::{Action, Direction, NetworkRule, RuleSpec, rule_specs};
pub use image::{Image, ImageState};
pub use instance_group::{GroupState, InstanceGroupManager};
pub use instance_template::{InstanceTemplate, InstanceTemplateInputs, MachineType};
pub use network::DefaultNetwork;
