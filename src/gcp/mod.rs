//! Google Cloud backend driven through the `gcloud` CLI.

mod client;
pub mod resources;
mod task;

pub use client::{Client, classify};
pub use task::GcpTask;

/// Translates generic region aliases to zones.
#[must_use]
pub fn region(name: &str) -> String {
    match name {
        "us-east" => "us-east1-c",
        "us-west" => "us-west1-b",
        "eu-north" => "europe-north1-a",
        "eu-west" => "europe-west1-d",
        other => other,
    }
    .to_owned()
}

/// Translates generic machine classes to `type[+accelerator*count]`.
#[must_use]
pub fn machine(name: &str) -> String {
    match name {
        "s" => "e2-micro",
        "m" => "e2-custom-8-32768",
        "l" => "e2-custom-32-131072",
        "xl" => "n2-custom-64-262144",
        "m+t4" => "n1-standard-4+nvidia-tesla-t4*1",
        "m+k80" => "n1-standard-4+nvidia-tesla-k80*1",
        "l+k80" => "n1-standard-32+nvidia-tesla-k80*4",
        "xl+k80" => "n1-standard-64+nvidia-tesla-k80*8",
        "m+v100" => "n1-highmem-8+nvidia-tesla-v100*1",
        "l+v100" => "n1-highmem-32+nvidia-tesla-v100*4",
        "xl+v100" => "n1-highmem-64+nvidia-tesla-v100*8",
        other => other,
    }
    .to_owned()
}

/// Translates image aliases to `user@project/family`.
#[must_use]
pub fn image(name: &str) -> String {
    match name {
        "ubuntu" => "ubuntu@ubuntu-os-cloud/ubuntu-2004-lts",
        "nvidia" => "ubuntu@deeplearning-platform-release/common-cu113",
        other => other,
    }
    .to_owned()
}
