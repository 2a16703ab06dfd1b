//! Kubernetes backend driven through `kubectl`.
//!
//! Tasks run as a Job whose pods mount one persistent volume claim; the
//! claim replaces object storage, and directory transfers go through a
//! short-lived pod.

mod client;
pub mod resources;
mod task;

pub use client::{Client, classify};
pub use task::KubernetesTask;

/// Translates generic machine classes to `cpu-memory[+accelerator*count]`.
#[must_use]
pub fn machine(name: &str) -> String {
    match name {
        "s" => "1-1Gi",
        "m" => "8-32Gi",
        "l" => "32-128Gi",
        "xl" => "64-256Gi",
        "m+t4" => "4-16Gi+nvidia-tesla-t4*1",
        "m+k80" => "4-64Gi+nvidia-tesla-k80*1",
        "l+k80" => "32-512Gi+nvidia-tesla-k80*4",
        "xl+k80" => "64-768Gi+nvidia-tesla-k80*8",
        "m+v100" => "8-64Gi+nvidia-tesla-v100*1",
        "l+v100" => "32-256Gi+nvidia-tesla-v100*4",
        "xl+v100" => "64-512Gi+nvidia-tesla-v100*8",
        other => other,
    }
    .to_owned()
}

/// Translates image aliases to container images.
#[must_use]
pub fn image(name: &str) -> String {
    match name {
        "ubuntu" => "ubuntu:20.04",
        "nvidia" => "nvidia/cuda:11.3.1-cudnn8-runtime-ubuntu20.04",
        other => other,
    }
    .to_owned()
}
