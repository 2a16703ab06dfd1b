//! Launch template describing every task machine.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::aws::Client;
use crate::common::{Resource, ResourceError, ResourceFuture, Slot, Task, ignore_not_found};
use crate::machine::{BootstrapScript, machine_environment};

use super::bucket::CredentialsState;
use super::image::ImageState;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Templates {
    #[serde(default)]
    launch_templates: Vec<Template>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Template {
    launch_template_id: String,
}

/// Prerequisites consumed by [`LaunchTemplate`].
#[derive(Clone, Debug)]
pub struct LaunchTemplateInputs {
    /// Resolved image.
    pub image: Slot<ImageState>,
    /// Security group identifier.
    pub security_group: Slot<String>,
    /// Key pair name.
    pub key_pair: Slot<String>,
    /// Storage credentials and machine variables.
    pub credentials: Slot<CredentialsState>,
}

/// Launch template named after the identifier.
#[derive(Debug)]
pub struct LaunchTemplate {
    client: Arc<Client>,
    inputs: LaunchTemplateInputs,
    task: Task,
    /// Observed template identifier.
    pub id: Slot<String>,
}

impl LaunchTemplate {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>, inputs: LaunchTemplateInputs, task: Task) -> Self {
        Self {
            client,
            inputs,
            task,
            id: Slot::new("launch template"),
        }
    }

    fn template_name(&self) -> String {
        self.client.identifier.long().to_owned()
    }

    fn template_data(&self) -> Result<Value, ResourceError> {
        let image = self.inputs.image.require()?;
        let group = self.inputs.security_group.require()?;
        let key = self.inputs.key_pair.require()?;
        let credentials = self.inputs.credentials.require()?;

        let variables = machine_environment(&self.task.environment.variables, credentials.variables);

        let script = BootstrapScript {
            script: &self.task.environment.script,
            environment: &variables,
            timeout: self.task.environment.timeout,
            binary_url: &self.client.settings.binary_url,
        }
        .render();

        let tags = self.client.tag_list();
        let mut data = json!({
            "ImageId": image.id,
            "InstanceType": crate::aws::machine(&self.task.size.machine),
            "KeyName": key,
            "SecurityGroupIds": [group],
            "UserData": STANDARD.encode(script),
            "TagSpecifications": [
                { "ResourceType": "instance", "Tags": tags },
                { "ResourceType": "volume", "Tags": tags },
            ],
        });
        if let (Some(size), Some(object)) = (self.task.size.storage_gb, data.as_object_mut()) {
            object.insert(
                String::from("BlockDeviceMappings"),
                json!([{
                    "DeviceName": "/dev/sda1",
                    "Ebs": { "VolumeSize": size, "DeleteOnTermination": true },
                }]),
            );
        }
        Ok(data)
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.template_name();
        let found: Templates = self.client.json(
            "launch templates",
            [
                "ec2",
                "describe-launch-templates",
                "--launch-template-names",
                name.as_str(),
            ],
        )?;
        let template = found
            .launch_templates
            .into_iter()
            .next()
            .ok_or(ResourceError::NotFound)?;
        self.id.set(template.launch_template_id);
        Ok(())
    }
}

impl Resource for LaunchTemplate {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let data = self.template_data()?;
            let result = self.client.run([
                String::from("ec2"),
                String::from("create-launch-template"),
                String::from("--launch-template-name"),
                self.template_name(),
                String::from("--launch-template-data"),
                data.to_string(),
            ]);
            match result {
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
            let name = self.template_name();
            ignore_not_found(
                self.client
                    .run([
                        "ec2",
                        "delete-launch-template",
                        "--launch-template-name",
                        name.as_str(),
                    ])
                    .map(|_| ()),
            )?;
            self.id.clear();
            Ok(())
        })
    }
}
