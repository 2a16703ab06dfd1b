//! Amazon Web Services backend driven through the `aws` CLI.

mod client;
pub mod resources;
mod task;

pub use client::{Client, classify};
pub use task::AwsTask;

/// Translates generic region aliases.
#[must_use]
pub fn region(name: &str) -> String {
    match name {
        "us-east" => "us-east-1",
        "us-west" => "us-west-1",
        "eu-north" => "eu-north-1",
        "eu-west" => "eu-west-1",
        other => other,
    }
    .to_owned()
}

/// Translates generic machine classes to instance types.
#[must_use]
pub fn machine(name: &str) -> String {
    match name {
        "s" => "t2.micro",
        "m" => "m5.2xlarge",
        "l" => "m5.8xlarge",
        "xl" => "m5.16xlarge",
        "m+t4" => "g4dn.xlarge",
        "m+k80" => "p2.xlarge",
        "l+k80" => "p2.8xlarge",
        "xl+k80" => "p2.16xlarge",
        "m+v100" => "p3.xlarge",
        "l+v100" => "p3.8xlarge",
        "xl+v100" => "p3.16xlarge",
        other => other,
    }
    .to_owned()
}

/// Translates image aliases to `user@owner:architecture:name-pattern`.
#[must_use]
pub fn image(name: &str) -> String {
    match name {
        "ubuntu" => "ubuntu@099720109477:x86_64:*ubuntu/images/hvm-ssd/ubuntu-focal-20.04-amd64-server-*",
        "nvidia" => "ubuntu@898082745236:x86_64:Deep Learning AMI GPU CUDA 11.4.* (Ubuntu 20.04) *",
        other => other,
    }
    .to_owned()
}
