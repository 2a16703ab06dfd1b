//! Microsoft Azure backend driven through the `az` CLI.

mod client;
pub mod resources;
mod task;

pub use client::{Client, classify};
pub use task::AzureTask;

/// Translates generic region aliases to locations.
#[must_use]
pub fn region(name: &str) -> String {
    match name {
        "us-east" => "eastus",
        "us-west" => "westus2",
        "eu-north" => "northeurope",
        "eu-west" => "westeurope",
        other => other,
    }
    .to_owned()
}

/// Translates generic machine classes to VM sizes.
#[must_use]
pub fn machine(name: &str) -> String {
    match name {
        "s" => "Standard_B1s",
        "m" => "Standard_F8s_v2",
        "l" => "Standard_F32s_v2",
        "xl" => "Standard_F64s_v2",
        "m+t4" => "Standard_NC4as_T4_v3",
        "m+k80" => "Standard_NC6",
        "l+k80" => "Standard_NC12",
        "xl+k80" => "Standard_NC24",
        "m+v100" => "Standard_NC6s_v3",
        "l+v100" => "Standard_NC12s_v3",
        "xl+v100" => "Standard_NC24s_v3",
        other => other,
    }
    .to_owned()
}

/// Translates image aliases to `user@publisher:offer:sku:version` URNs.
#[must_use]
pub fn image(name: &str) -> String {
    match name {
        "ubuntu" => "ubuntu@Canonical:0001-com-ubuntu-server-focal:20_04-lts:latest",
        "nvidia" => "ubuntu@microsoft-dsvm:ubuntu-2004:2004-gen2:latest",
        other => other,
    }
    .to_owned()
}
