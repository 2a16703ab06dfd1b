//! Azure resources, grouped by service.

mod network;
mod resource_group;
mod scale_set;
mod storage;

pub use network::{SecurityGroup, SecurityRule, Subnet, VirtualNetwork, security_rules};
pub use resource_group::ResourceGroup;
pub use scale_set::{ScaleSetInputs, ScaleSetState, VirtualMachineScaleSet};
pub use storage::{AccountState, BlobContainer, Credentials, CredentialsState, StorageAccount};
