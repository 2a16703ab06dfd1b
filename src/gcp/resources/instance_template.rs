//! Instance template carrying the bootstrap script and SSH key.

use std::io::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::common::{
    DeterministicKeyPair, Resource, ResourceError, ResourceFuture, Slot, SpotPolicy, Task,
    ignore_not_found,
};
use crate::gcp::Client;
use crate::machine::{BootstrapScript, machine_environment};

use super::bucket::CredentialsState;
use super::image::ImageState;

#[derive(Deserialize)]
struct Described {
    name: String,
}

/// Machine type with an optional accelerator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineType {
    /// Compute Engine machine type.
    pub name: String,
    /// Accelerator type and count.
    pub accelerator: Option<(String, u16)>,
}

impl MachineType {
    /// Parses `type[+accelerator[*count]]`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Invalid`] when the count is not a number.
    pub fn parse(value: &str) -> Result<Self, ResourceError> {
        let Some((name, accelerator)) = value.split_once('+') else {
            return Ok(Self {
                name: value.to_owned(),
                accelerator: None,
            });
        };
        let (kind, count) = match accelerator.split_once('*') {
            Some((kind, count)) => (
                kind,
                count.parse().map_err(|_| {
                    ResourceError::invalid("machine", format!("invalid accelerator count in {value}"))
                })?,
            ),
            None => (accelerator, 1),
        };
        Ok(Self {
            name: name.to_owned(),
            accelerator: Some((kind.to_owned(), count)),
        })
    }
}

/// Prerequisites consumed by [`InstanceTemplate`].
#[derive(Clone, Debug)]
pub struct InstanceTemplateInputs {
    /// Default network name.
    pub network: Slot<String>,
    /// Resolved boot image.
    pub image: Slot<ImageState>,
    /// Storage credentials and machine variables.
    pub credentials: Slot<CredentialsState>,
}

/// Template named after the identifier.
#[derive(Debug)]
pub struct InstanceTemplate {
    client: Arc<Client>,
    inputs: InstanceTemplateInputs,
    task: Task,
    public_key: String,
    /// Observed template name.
    pub name: Slot<String>,
}

impl InstanceTemplate {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(
        client: Arc<Client>,
        inputs: InstanceTemplateInputs,
        task: Task,
        keys: &DeterministicKeyPair,
    ) -> Self {
        Self {
            client,
            inputs,
            task,
            public_key: keys.public_openssh(),
            name: Slot::new("instance template"),
        }
    }

    fn startup_script(&self) -> Result<NamedTempFile, ResourceError> {
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
            path: String::from("startup script"),
            message: err.to_string(),
        };
        let mut file = NamedTempFile::new().map_err(io_error)?;
        file.write_all(script.as_bytes()).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        Ok(file)
    }

    fn create_arguments(&self, startup_script: &str) -> Result<Vec<String>, ResourceError> {
        let network = self.inputs.network.require()?;
        let image = self.inputs.image.require()?;
        let machine = MachineType::parse(&crate::gcp::machine(&self.task.size.machine))?;

        let mut args = vec![
            String::from("compute"),
            String::from("instance-templates"),
            String::from("create"),
            self.client.identifier.long().to_owned(),
            String::from("--machine-type"),
            machine.name,
            String::from("--image"),
            image.self_link,
            String::from("--network"),
            network,
            String::from("--tags"),
            self.client.identifier.long().to_owned(),
            format!("--metadata-from-file=startup-script={startup_script}"),
            format!("--metadata=ssh-keys={}:{}", image.user, self.public_key),
        ];
        if let Some((kind, count)) = machine.accelerator {
            args.push(format!("--accelerator=type={kind},count={count}"));
            args.push(String::from("--maintenance-policy=TERMINATE"));
        }
        if let Some(size) = self.task.size.storage_gb {
            args.push(format!("--boot-disk-size={size}GB"));
        }
        if let Some(labels) = self.client.labels() {
            args.push(format!("--labels={labels}"));
        }
        match self.task.spot.policy() {
            SpotPolicy::OnDemand => {}
            SpotPolicy::Auto => args.extend(spot_arguments()),
            SpotPolicy::Fixed(price) => {
                tracing::warn!(price, "fixed spot prices are unsupported, using market price");
                args.extend(spot_arguments());
            }
        }
        Ok(args)
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let template: Described = self.client.json(
            "instance template",
            [
                "compute",
                "instance-templates",
                "describe",
                self.client.identifier.long(),
            ],
        )?;
        self.name.set(template.name);
        Ok(())
    }
}

fn spot_arguments() -> [String; 2] {
    [
        String::from("--provisioning-model=SPOT"),
        String::from("--instance-termination-action=DELETE"),
    ]
}

impl Resource for InstanceTemplate {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let startup_script = self.startup_script()?;
            let path = startup_script.path().to_string_lossy().into_owned();
            match self.client.run(self.create_arguments(&path)?) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            ignore_not_found(
                self.client
                    .run([
                        "compute",
                        "instance-templates",
                        "delete",
                        self.client.identifier.long(),
                        "--quiet",
                    ])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::*;
    use crate::common::{Size, Spot};
    use crate::gcp::tests::client;
    use crate::test_support::ScriptedRunner;

    fn template(runner: &ScriptedRunner, task: Task) -> InstanceTemplate {
        let inputs = InstanceTemplateInputs {
            network: Slot::new("network"),
            image: Slot::new("image"),
            credentials: Slot::new("credentials"),
        };
        inputs.network.set(String::from("default"));
        inputs.image.set(ImageState {
            self_link: String::from("https://compute/images/ubuntu"),
            user: String::from("ubuntu"),
        });
        inputs.credentials.set(CredentialsState {
            remote: String::from(":googlecloudstorage:bucket"),
            variables: BTreeMap::new(),
        });
        let keys = DeterministicKeyPair::with_bits("secret", "tpi-test", 1024).expect("key");
        InstanceTemplate::new(Arc::new(client(runner)), inputs, task, &keys)
    }

    #[rstest]
    #[case("e2-micro", "e2-micro", None)]
    #[case("n1-standard-4+nvidia-tesla-t4", "n1-standard-4", Some(("nvidia-tesla-t4", 1)))]
    #[case("n1-highmem-64+nvidia-tesla-v100*8", "n1-highmem-64", Some(("nvidia-tesla-v100", 8)))]
    fn parses_machine_types(
        #[case] value: &str,
        #[case] name: &str,
        #[case] accelerator: Option<(&str, u16)>,
    ) {
        let parsed = MachineType::parse(value).expect("parse");
        assert_eq!(parsed.name, name);
        assert_eq!(
            parsed.accelerator,
            accelerator.map(|(kind, count)| (kind.to_owned(), count))
        );
    }

    #[test]
    fn rejects_non_numeric_accelerator_count() {
        assert!(MachineType::parse("n1-standard-4+nvidia-tesla-t4*many").is_err());
    }

    #[test]
    fn accelerators_require_terminate_policy() {
        let runner = ScriptedRunner::new();
        let task = Task {
            size: Size {
                machine: String::from("m+v100"),
                storage_gb: Some(60),
            },
            ..Task::default()
        };
        let args = template(&runner, task).create_arguments("/tmp/startup").expect("args");

        assert!(args.contains(&String::from("--accelerator=type=nvidia-tesla-v100,count=1")));
        assert!(args.contains(&String::from("--maintenance-policy=TERMINATE")));
        assert!(args.contains(&String::from("--boot-disk-size=60GB")));
        assert!(args.contains(&String::from("--metadata-from-file=startup-script=/tmp/startup")));
    }

    #[rstest]
    #[case(Spot::AUTO)]
    #[case(Spot(0.25))]
    fn spot_uses_spot_provisioning(#[case] spot: Spot) {
        let runner = ScriptedRunner::new();
        let task = Task {
            spot,
            ..Task::default()
        };
        let args = template(&runner, task).create_arguments("/tmp/startup").expect("args");
        assert!(args.contains(&String::from("--provisioning-model=SPOT")));
    }

    #[test]
    fn on_demand_has_no_provisioning_model() {
        let runner = ScriptedRunner::new();
        let args = template(&runner, Task::default())
            .create_arguments("/tmp/startup")
            .expect("args");
        assert!(!args.iter().any(|arg| arg.starts_with("--provisioning-model")));
    }
}
