//! AWS resources, one module per cloud object.

mod auto_scaling_group;
mod bucket;
mod image;
mod key_pair;
mod launch_template;
mod network;
mod security_group;

pub use auto_scaling_group::{AutoScalingGroup, GroupState};
pub use bucket::{Bucket, Credentials, CredentialsState};
pub use image::{Image, ImageState};
pub use key_pair::KeyPair;
pub use launch_template::{LaunchTemplate, LaunchTemplateInputs};
pub use network::{DefaultVpc, DefaultVpcSubnets};
pub use security_group::{SecurityGroup, ip_permissions};
