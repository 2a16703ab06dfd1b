//! Virtual machine scale set: the scaling primitive of the Azure backend.

use std::io::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::az::Client;
use crate::common::{
    DeterministicKeyPair, Resource, ResourceError, ResourceFuture, Slot, SpotPolicy, Task,
    ignore_not_found, split_image,
};
use crate::machine::{BootstrapScript, machine_environment};

use super::storage::CredentialsState;

#[derive(Deserialize)]
struct ScaleSet {
    sku: Sku,
}

#[derive(Deserialize)]
struct Sku {
    #[serde(default)]
    capacity: u32,
}

#[derive(Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

#[derive(Deserialize)]
struct InstanceStatus {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicAddress {
    ip_address: Option<String>,
}

/// Observed state of the scale set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScaleSetState {
    /// Requested machine count.
    pub desired: u32,
    /// Machines whose power state is running.
    pub running: u32,
    /// Public addresses of the machines.
    pub addresses: Vec<String>,
}

/// Prerequisites consumed by [`VirtualMachineScaleSet`].
#[derive(Clone, Debug)]
pub struct ScaleSetInputs {
    /// Subnet resource identifier.
    pub subnet: Slot<String>,
    /// Storage credentials and machine variables.
    pub credentials: Slot<CredentialsState>,
}

/// Scale set named after the identifier.
#[derive(Debug)]
pub struct VirtualMachineScaleSet {
    client: Arc<Client>,
    inputs: ScaleSetInputs,
    task: Task,
    public_key: String,
    /// Observed state.
    pub state: Slot<ScaleSetState>,
}

impl VirtualMachineScaleSet {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(
        client: Arc<Client>,
        inputs: ScaleSetInputs,
        task: Task,
        keys: &DeterministicKeyPair,
    ) -> Self {
        Self {
            client,
            inputs,
            task,
            public_key: keys.public_openssh(),
            state: Slot::new("virtual machine scale set"),
        }
    }

    fn name(&self) -> &str {
        self.client.identifier.long()
    }

    fn custom_data(&self) -> Result<NamedTempFile, ResourceError> {
        let credentials = self.inputs.credentials.require()?;
        let environment =
            machine_environment(&self.task.environment.variables, credentials.variables);
        let script = BootstrapScript {
            script: &self.task.environment.script,
            environment: &environment,
            timeout: self.task.environment.timeout,
            binary_url: &self.client.settings.binary_url,
        }
        .render();

        let io_error = |err: std::io::Error| ResourceError::Io {
            path: String::from("custom data"),
            message: err.to_string(),
        };
        let mut file = NamedTempFile::new().map_err(io_error)?;
        file.write_all(script.as_bytes()).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        Ok(file)
    }

    fn create_arguments(&self, custom_data: &str) -> Result<Vec<String>, ResourceError> {
        let subnet = self.inputs.subnet.require()?;
        let reference = crate::az::image(&self.task.environment.image);
        let (user, image) = split_image(&reference);

        let mut args = vec![
            String::from("vmss"),
            String::from("create"),
            String::from("--name"),
            self.name().to_owned(),
            String::from("--resource-group"),
            self.client.group().to_owned(),
            String::from("--location"),
            self.client.location.clone(),
            String::from("--image"),
            image.to_owned(),
            String::from("--vm-sku"),
            crate::az::machine(&self.task.size.machine),
            String::from("--instance-count"),
            self.task.parallelism.to_string(),
            String::from("--admin-username"),
            user.to_owned(),
            String::from("--ssh-key-values"),
            self.public_key.clone(),
            String::from("--subnet"),
            subnet,
            String::from("--custom-data"),
            custom_data.to_owned(),
            String::from("--public-ip-per-vm"),
            String::from("--upgrade-policy-mode"),
            String::from("Manual"),
            String::from("--load-balancer"),
            String::new(),
        ];
        if let Some(size) = self.task.size.storage_gb {
            args.push(String::from("--os-disk-size-gb"));
            args.push(size.to_string());
        }
        let max_price = match self.task.spot.policy() {
            SpotPolicy::OnDemand => None,
            SpotPolicy::Auto => Some(String::from("-1")),
            SpotPolicy::Fixed(price) => Some(format!("{price:.5}")),
        };
        if let Some(price) = max_price {
            args.extend([
                String::from("--priority"),
                String::from("Spot"),
                String::from("--eviction-policy"),
                String::from("Delete"),
                String::from("--max-price"),
                price,
            ]);
        }
        args.extend(self.client.tag_args());
        Ok(args)
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.name();
        let group = self.client.group();
        let scale_set: ScaleSet = self.client.json(
            "scale set",
            ["vmss", "show", "--name", name, "--resource-group", group],
        )?;
        let views: Vec<InstanceView> = self.client.json(
            "scale set instances",
            [
                "vmss",
                "get-instance-view",
                "--name",
                name,
                "--resource-group",
                group,
                "--instance-id",
                "*",
            ],
        )?;
        let running = views
            .iter()
            .filter(|view| {
                view.statuses
                    .iter()
                    .any(|status| status.code == "PowerState/running")
            })
            .count();
        let addresses: Vec<PublicAddress> = self.client.json(
            "scale set addresses",
            [
                "vmss",
                "list-instance-public-ips",
                "--name",
                name,
                "--resource-group",
                group,
            ],
        )?;

        self.state.set(ScaleSetState {
            desired: scale_set.sku.capacity,
            running: u32::try_from(running).unwrap_or(u32::MAX),
            addresses: addresses
                .into_iter()
                .filter_map(|address| address.ip_address)
                .collect(),
        });
        Ok(())
    }

    /// Sets the instance count without touching anything else.
    pub fn resize(&self, count: u16) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.client.run([
                String::from("vmss"),
                String::from("scale"),
                String::from("--name"),
                self.name().to_owned(),
                String::from("--resource-group"),
                self.client.group().to_owned(),
                String::from("--new-capacity"),
                count.to_string(),
            ])?;
            self.lookup()
        })
    }
}

impl Resource for VirtualMachineScaleSet {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let custom_data = self.custom_data()?;
            let path = custom_data.path().to_string_lossy().into_owned();
            let args = self.create_arguments(&path)?;
            match self.client.run(args) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn update(&self) -> ResourceFuture<'_> {
        self.resize(self.task.parallelism)
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            ignore_not_found(
                self.client
                    .run([
                        "vmss",
                        "delete",
                        "--name",
                        self.name(),
                        "--resource-group",
                        self.client.group(),
                    ])
                    .map(|_| ()),
            )?;
            self.state.clear();
            Ok(())
        })
    }
}
